//! # HTTP Page Sample
//!
//! One telemetry sample describing an HTTP page load as seen by a passive network
//! sensor. The payload is wide (a couple of hundred fields) and flat on the wire;
//! in Rust it is split into named groups that are `#[serde(flatten)]`-ed back into
//! a single JSON object with camelCase keys.
//!
//! Each field's snake_case name is also the dataset column header it is read from,
//! so the group macro derives both the struct and its column mapping from a single
//! field list.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Typed access to one row of a tabular dataset, addressed by column header.
///
/// Implementations return the type's zero value for missing or unparsable cells.
pub trait ColumnSource {
    /// Trimmed text of the cell, empty when the column is absent.
    fn text(&self, column: &str) -> String;
    /// Cell as a 32-bit integer.
    fn int(&self, column: &str) -> i32;
    /// Cell as a 64-bit integer.
    fn long(&self, column: &str) -> i64;
    /// Cell as a floating point number.
    fn double(&self, column: &str) -> f64;
}

/// Field types that can be read from a [`ColumnSource`].
pub trait FromColumn: Sized {
    /// Reads `column` from `row`.
    fn from_column(row: &dyn ColumnSource, column: &str) -> Self;
}

impl FromColumn for String {
    fn from_column(row: &dyn ColumnSource, column: &str) -> Self {
        row.text(column)
    }
}

impl FromColumn for i32 {
    fn from_column(row: &dyn ColumnSource, column: &str) -> Self {
        row.int(column)
    }
}

impl FromColumn for i64 {
    fn from_column(row: &dyn ColumnSource, column: &str) -> Self {
        row.long(column)
    }
}

impl FromColumn for f64 {
    fn from_column(row: &dyn ColumnSource, column: &str) -> Self {
        row.double(column)
    }
}

macro_rules! sample_group {
    (
        $(#[$meta:meta])*
        $name:ident { $($field:ident: $ty:ty),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(default, rename_all = "camelCase")]
        pub struct $name {
            $(pub $field: $ty,)+
        }

        impl $name {
            /// Dataset column headers of this group, in declaration order.
            pub const COLUMNS: &'static [&'static str] = &[$(stringify!($field)),+];

            /// Reads every field of the group from `row`.
            pub fn from_columns(row: &dyn ColumnSource) -> Self {
                Self {
                    $($field: <$ty as FromColumn>::from_column(row, stringify!($field)),)+
                }
            }
        }
    };
}

sample_group! {
    /// Addressing of the observed session.
    Endpoints {
        src_ip: String,
        dst_ip: String,
        src_port: i32,
        dst_port: i32,
        src_mac: String,
        dst_mac: String,
    }
}

sample_group! {
    /// Capture-frame timing recorded by the sensor.
    FrameTiming {
        ts_frame_arrival: f64,
        ts_frame_landoff: f64,
        page_idx: i64,
        ts_server_nsec: f64,
    }
}

sample_group! {
    /// Byte lengths, split by direction.
    ByteLengths {
        page_http_len: i64,
        page_http_len_req: i64,
        page_http_len_res: i64,
        page_http_header_len_req: i64,
        page_http_header_len_res: i64,
        page_http_content_len_req: i64,
        page_http_content_len_res: i64,
        page_pkt_len: i64,
        page_pkt_len_req: i64,
        page_pkt_len_res: i64,
        page_tcp_len: i64,
        page_tcp_len_req: i64,
        page_tcp_len_res: i64,
        http_content_length: i64,
        http_content_length_req: i64,
        conn_err_session_len: i64,
        req_conn_err_session_len: i64,
        res_conn_err_session_len: i64,
        retransmission_len: i64,
        retransmission_len_req: i64,
        retransmission_len_res: i64,
        out_of_order_len: i64,
        out_of_order_len_req: i64,
        out_of_order_len_res: i64,
        lost_seg_len: i64,
        lost_seg_len_req: i64,
        lost_seg_len_res: i64,
        ack_lost_len: i64,
        ack_lost_len_req: i64,
        ack_lost_len_res: i64,
        win_update_len: i64,
        win_update_len_req: i64,
        win_update_len_res: i64,
        dup_ack_len: i64,
        dup_ack_len_req: i64,
        dup_ack_len_res: i64,
        zero_win_len: i64,
        zero_win_len_req: i64,
        zero_win_len_res: i64,
        checksum_error_len: i64,
        checksum_error_len_req: i64,
        checksum_error_len_res: i64,
        tcp_error_len: i64,
        tcp_error_len_req: i64,
        tcp_error_len_res: i64,
    }
}

sample_group! {
    /// TCP-level packet and session counters.
    TcpCounters {
        page_rtt_conn_cnt_req: i32,
        page_rtt_conn_cnt_res: i32,
        page_rtt_ack_cnt_req: i32,
        page_rtt_ack_cnt_res: i32,
        page_req_making_cnt: i32,
        page_http_cnt: i32,
        page_http_cnt_req: i32,
        page_http_cnt_res: i32,
        page_pkt_cnt: i32,
        page_pkt_cnt_req: i32,
        page_pkt_cnt_res: i32,
        page_session_cnt: i64,
        page_tcp_connect_cnt: i32,
        conn_err_pkt_cnt: i32,
        conn_err_session_cnt: i32,
        retransmission_cnt: i32,
        retransmission_cnt_req: i32,
        retransmission_cnt_res: i32,
        out_of_order_cnt: i32,
        out_of_order_cnt_req: i32,
        out_of_order_cnt_res: i32,
        lost_seg_cnt: i32,
        lost_seg_cnt_req: i32,
        lost_seg_cnt_res: i32,
        ack_lost_cnt: i32,
        ack_lost_cnt_req: i32,
        ack_lost_cnt_res: i32,
        win_update_cnt: i32,
        win_update_cnt_req: i32,
        win_update_cnt_res: i32,
        dup_ack_cnt: i32,
        dup_ack_cnt_req: i32,
        dup_ack_cnt_res: i32,
        zero_win_cnt: i32,
        zero_win_cnt_req: i32,
        zero_win_cnt_res: i32,
        window_full_cnt: i32,
        window_full_cnt_req: i32,
        window_full_cnt_res: i32,
        page_tcp_cnt: i32,
        page_tcp_cnt_req: i32,
        page_tcp_cnt_res: i32,
        stopped_transaction_cnt: i32,
        stopped_transaction_cnt_req: i32,
        stopped_transaction_cnt_res: i32,
        incomplete_cnt: i32,
        incomplete_cnt_req: i32,
        incomplete_cnt_res: i32,
        timeout_cnt: i32,
        timeout_cnt_req: i32,
        timeout_cnt_res: i32,
        ts_page_rto_cnt_req: i32,
        ts_page_rto_cnt_res: i32,
        tcp_error_cnt: i32,
        tcp_error_cnt_req: i32,
        tcp_error_cnt_res: i32,
        page_error_cnt: i32,
    }
}

sample_group! {
    /// HTTP method, status code, URI and content-type counters.
    HttpCounters {
        req_method_get_cnt: i32,
        req_method_put_cnt: i32,
        req_method_head_cnt: i32,
        req_method_post_cnt: i32,
        req_method_trace_cnt: i32,
        req_method_delete_cnt: i32,
        req_method_options_cnt: i32,
        req_method_patch_cnt: i32,
        req_method_connect_cnt: i32,
        req_method_oth_cnt: i32,
        req_method_get_cnt_error: i32,
        req_method_put_cnt_error: i32,
        req_method_head_cnt_error: i32,
        req_method_post_cnt_error: i32,
        req_method_trace_cnt_error: i32,
        req_method_delete_cnt_error: i32,
        req_method_options_cnt_error: i32,
        req_method_patch_cnt_error: i32,
        req_method_connect_cnt_error: i32,
        req_method_oth_cnt_error: i32,
        res_code_1xx_cnt: i32,
        res_code_2xx_cnt: i32,
        res_code_304_cnt: i32,
        res_code_3xx_cnt: i32,
        res_code_401_cnt: i32,
        res_code_403_cnt: i32,
        res_code_404_cnt: i32,
        res_code_4xx_cnt: i32,
        res_code_5xx_cnt: i32,
        res_code_oth_cnt: i32,
        uri_cnt: i32,
        http_uri_cnt: i32,
        https_uri_cnt: i32,
        content_type_html_cnt_req: i32,
        content_type_html_cnt_res: i32,
        content_type_css_cnt_req: i32,
        content_type_css_cnt_res: i32,
        content_type_js_cnt_req: i32,
        content_type_js_cnt_res: i32,
        content_type_img_cnt_req: i32,
        content_type_img_cnt_res: i32,
        content_type_oth_cnt_req: i32,
        content_type_oth_cnt_res: i32,
    }
}

sample_group! {
    /// Page phase timings in milliseconds.
    PageTimings {
        ts_first: f64,
        ts_page_begin: f64,
        ts_page_end: f64,
        ts_page_req_syn: f64,
        ts_page: f64,
        ts_page_gap: f64,
        ts_page_res_init: f64,
        ts_page_res_init_gap: f64,
        ts_page_res_app: f64,
        ts_page_res_app_gap: f64,
        ts_page_res: f64,
        ts_page_res_gap: f64,
        ts_page_transfer_req: f64,
        ts_page_transfer_req_gap: f64,
        ts_page_transfer_res: f64,
        ts_page_transfer_res_gap: f64,
        ts_page_req_making_sum: f64,
        ts_page_req_making_avg: f64,
        ts_page_tcp_connect_sum: f64,
        ts_page_tcp_connect_min: f64,
        ts_page_tcp_connect_max: f64,
        ts_page_tcp_connect_avg: f64,
    }
}

sample_group! {
    /// Throughput (Mbps / pps) and error ratios.
    Throughput {
        mbps: f64,
        mbps_req: f64,
        mbps_res: f64,
        pps: f64,
        pps_req: f64,
        pps_res: f64,
        mbps_min: f64,
        mbps_min_req: f64,
        mbps_min_res: f64,
        pps_min: f64,
        pps_min_req: f64,
        pps_min_res: f64,
        mbps_max: f64,
        mbps_max_req: f64,
        mbps_max_res: f64,
        pps_max: f64,
        pps_max_req: f64,
        pps_max_res: f64,
        tcp_error_percentage: f64,
        tcp_error_percentage_req: f64,
        tcp_error_percentage_res: f64,
        page_error_percentage: f64,
    }
}

sample_group! {
    /// Geo-IP resolution of both ends.
    Location {
        country_name_req: String,
        country_name_res: String,
        continent_name_req: String,
        continent_name_res: String,
        domestic_primary_name_req: String,
        domestic_primary_name_res: String,
        domestic_sub1_name_req: String,
        domestic_sub1_name_res: String,
        domestic_sub2_name_req: String,
        domestic_sub2_name_res: String,
    }
}

sample_group! {
    /// Protocol classification and HTTP request/response metadata.
    ProtocolMeta {
        ndpi_protocol_app: String,
        ndpi_protocol_master: String,
        sensor_device_name: String,
        http_res_code: String,
        is_https: i32,
        http_method: String,
        http_version: String,
        http_version_req: String,
        http_version_res: String,
        http_res_phrase: String,
        http_content_type: String,
        http_user_agent: String,
        http_cookie: String,
        http_location: String,
        http_host: String,
        http_uri: String,
        http_uri_split: String,
        http_referer: String,
    }
}

sample_group! {
    /// Parsed user-agent attributes.
    UserAgent {
        user_agent_software_name: String,
        user_agent_operating_system_name: String,
        user_agent_operating_platform: String,
        user_agent_software_type: String,
        user_agent_hardware_type: String,
        user_agent_layout_engine_name: String,
    }
}

/// # Page Sample
///
/// The record type replayed by the engine. `row_key`, `ts_server` and `created_at`
/// are the mutable identity fields: they are rewritten every time the record is
/// emitted so downstream consumers never see the same key twice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PageSample {
    /// Unique key of this emission.
    pub row_key: String,
    /// Server-side timestamp of this emission.
    pub ts_server: Option<NaiveDateTime>,
    /// When the record instance was created (load time or emission time).
    pub created_at: Option<NaiveDateTime>,
    #[serde(flatten)]
    pub endpoints: Endpoints,
    #[serde(flatten)]
    pub frame: FrameTiming,
    #[serde(flatten)]
    pub lengths: ByteLengths,
    #[serde(flatten)]
    pub tcp: TcpCounters,
    #[serde(flatten)]
    pub http_counters: HttpCounters,
    #[serde(flatten)]
    pub timings: PageTimings,
    #[serde(flatten)]
    pub throughput: Throughput,
    #[serde(flatten)]
    pub location: Location,
    #[serde(flatten)]
    pub protocol: ProtocolMeta,
    #[serde(flatten)]
    pub user_agent: UserAgent,
}

impl PageSample {
    /// Builds a sample from one dataset row. `ts_server` is left unset; it is
    /// stamped when the record is emitted.
    pub fn from_columns(row: &dyn ColumnSource) -> Self {
        Self {
            row_key: row.text("row_key"),
            ts_server: None,
            created_at: None,
            endpoints: Endpoints::from_columns(row),
            frame: FrameTiming::from_columns(row),
            lengths: ByteLengths::from_columns(row),
            tcp: TcpCounters::from_columns(row),
            http_counters: HttpCounters::from_columns(row),
            timings: PageTimings::from_columns(row),
            throughput: Throughput::from_columns(row),
            location: Location::from_columns(row),
            protocol: ProtocolMeta::from_columns(row),
            user_agent: UserAgent::from_columns(row),
        }
    }

    /// Every dataset column header the sample reads, `row_key` first.
    pub fn columns() -> impl Iterator<Item = &'static str> {
        std::iter::once("row_key")
            .chain(Endpoints::COLUMNS.iter().copied())
            .chain(FrameTiming::COLUMNS.iter().copied())
            .chain(ByteLengths::COLUMNS.iter().copied())
            .chain(TcpCounters::COLUMNS.iter().copied())
            .chain(HttpCounters::COLUMNS.iter().copied())
            .chain(PageTimings::COLUMNS.iter().copied())
            .chain(Throughput::COLUMNS.iter().copied())
            .chain(Location::COLUMNS.iter().copied())
            .chain(ProtocolMeta::COLUMNS.iter().copied())
            .chain(UserAgent::COLUMNS.iter().copied())
    }
}
