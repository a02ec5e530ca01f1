//! # Anomaly Scenarios
//!
//! Synthetic record generators for demo runs. Each scenario fabricates a burst of
//! samples exhibiting one kind of trouble (a slow country, a 5xx spike, TCP
//! errors, a misbehaving browser) or a burst of healthy samples to "recover".
//! The burst is emitted through the same [`Fanout`] as the replay, so it is both
//! persisted and pushed to live subscribers.

use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::dispatcher::PublishReport;
use crate::core::fanout::Fanout;
use crate::models::PageSample;
use crate::utils::local_now;

/// One anomaly burst.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scenario {
    /// Page loads from `country` take 15-20 s.
    SlowCountry { country: String, count: usize },
    /// HTTP 500 responses with 8-10 s page times.
    ErrorSpike { count: usize },
    /// Elevated TCP error and retransmission counts.
    TcpError { count: usize },
    /// One browser timing out (HTTP 408, 12-15 s page times).
    BrowserIssue { browser: String, count: usize },
    /// Healthy samples, 1-2 s page times.
    Recover { count: usize },
}

impl Scenario {
    pub fn slow_country(country: impl Into<String>, count: usize) -> Self {
        Scenario::SlowCountry {
            country: country.into(),
            count,
        }
    }

    pub fn error_spike(count: usize) -> Self {
        Scenario::ErrorSpike { count }
    }

    pub fn tcp_error(count: usize) -> Self {
        Scenario::TcpError { count }
    }

    pub fn browser_issue(browser: impl Into<String>, count: usize) -> Self {
        Scenario::BrowserIssue {
            browser: browser.into(),
            count,
        }
    }

    pub fn recover(count: usize) -> Self {
        Scenario::Recover { count }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::SlowCountry { .. } => "slow-country",
            Scenario::ErrorSpike { .. } => "error-spike",
            Scenario::TcpError { .. } => "tcp-error",
            Scenario::BrowserIssue { .. } => "browser-issue",
            Scenario::Recover { .. } => "recover",
        }
    }

    pub fn count(&self) -> usize {
        match self {
            Scenario::SlowCountry { count, .. }
            | Scenario::ErrorSpike { count }
            | Scenario::TcpError { count }
            | Scenario::BrowserIssue { count, .. }
            | Scenario::Recover { count } => *count,
        }
    }

    /// Fabricates the burst.
    pub fn generate<R: Rng>(&self, rng: &mut R) -> Vec<PageSample> {
        (0..self.count())
            .map(|_| {
                let mut sample = base_sample(rng);
                match self {
                    Scenario::SlowCountry { country, .. } => {
                        sample.location.country_name_req = country.clone();
                        sample.timings.ts_page = rng.random_range(15000.0..20000.0);
                        sample.timings.ts_page_res = rng.random_range(10000.0..13000.0);
                    }
                    Scenario::ErrorSpike { .. } => {
                        sample.protocol.http_res_code = "500".to_string();
                        sample.http_counters.res_code_5xx_cnt = 1;
                        sample.timings.ts_page = rng.random_range(8000.0..10000.0);
                    }
                    Scenario::TcpError { .. } => {
                        sample.tcp.tcp_error_cnt = rng.random_range(5..15);
                        sample.tcp.retransmission_cnt = rng.random_range(3..8);
                        sample.timings.ts_page = rng.random_range(6000.0..8000.0);
                    }
                    Scenario::BrowserIssue { browser, .. } => {
                        sample.user_agent.user_agent_software_name = browser.clone();
                        sample.timings.ts_page = rng.random_range(12000.0..15000.0);
                        sample.protocol.http_res_code = "408".to_string();
                    }
                    Scenario::Recover { .. } => {
                        sample.timings.ts_page = rng.random_range(1000.0..2000.0);
                        sample.timings.ts_page_res = rng.random_range(500.0..1000.0);
                        sample.tcp.tcp_error_cnt = 0;
                    }
                }
                sample
            })
            .collect()
    }
}

/// An ordinary desktop Chrome GET against `example.com`, stamped now.
fn base_sample<R: Rng>(rng: &mut R) -> PageSample {
    let now = local_now();
    let mut sample = PageSample {
        row_key: Uuid::new_v4().to_string(),
        ts_server: Some(now),
        created_at: Some(now),
        ..Default::default()
    };
    sample.endpoints.src_ip = format!("192.168.1.{}", rng.random_range(0..255));
    sample.endpoints.dst_ip = format!("10.0.0.{}", rng.random_range(0..255));
    sample.endpoints.src_port = rng.random_range(50000..60000);
    sample.endpoints.dst_port = 80;
    sample.location.country_name_req = "KR".to_string();
    sample.user_agent.user_agent_software_name = "Chrome".to_string();
    sample.user_agent.user_agent_hardware_type = "Desktop".to_string();
    sample.protocol.http_method = "GET".to_string();
    sample.protocol.http_host = "example.com".to_string();
    sample.protocol.http_uri = "/api/slow".to_string();
    sample.protocol.http_res_code = "200".to_string();
    sample.tcp.page_http_cnt_req = 1;
    sample.tcp.page_http_cnt_res = 1;
    sample
}

/// Generates `scenario` and emits it through `fanout`. Returns `None` when the
/// scenario asked for zero records.
pub fn trigger(scenario: &Scenario, fanout: &Fanout) -> Option<PublishReport> {
    match scenario {
        Scenario::Recover { count } => info!(scenario = scenario.name(), count, "Scenario triggered"),
        _ => warn!(scenario = scenario.name(), count = scenario.count(), "Anomaly scenario triggered"),
    }
    let samples = scenario.generate(&mut rand::rng());
    let report = fanout.emit_batch(samples);
    if let Some(report) = &report {
        info!(
            scenario = scenario.name(),
            records = scenario.count(),
            delivered = report.delivered,
            "Scenario emitted"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatcher::Dispatcher;
    use crate::core::fanout::NullSink;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn slow_country_samples_are_slow_and_local() {
        let samples = Scenario::slow_country("JP", 20).generate(&mut rng());
        assert_eq!(samples.len(), 20);
        for s in &samples {
            assert_eq!(s.location.country_name_req, "JP");
            assert!((15000.0..20000.0).contains(&s.timings.ts_page));
            assert!((10000.0..13000.0).contains(&s.timings.ts_page_res));
            assert!((50000..60000).contains(&s.endpoints.src_port));
            assert!(s.endpoints.src_ip.starts_with("192.168.1."));
        }
        let keys: HashSet<&str> = samples.iter().map(|s| s.row_key.as_str()).collect();
        assert_eq!(keys.len(), 20);
    }

    #[test]
    fn error_spike_marks_server_errors() {
        for s in Scenario::error_spike(10).generate(&mut rng()) {
            assert_eq!(s.protocol.http_res_code, "500");
            assert_eq!(s.http_counters.res_code_5xx_cnt, 1);
            assert!((8000.0..10000.0).contains(&s.timings.ts_page));
        }
    }

    #[test]
    fn tcp_error_raises_counters() {
        for s in Scenario::tcp_error(10).generate(&mut rng()) {
            assert!((5..15).contains(&s.tcp.tcp_error_cnt));
            assert!((3..8).contains(&s.tcp.retransmission_cnt));
            assert!((6000.0..8000.0).contains(&s.timings.ts_page));
        }
    }

    #[test]
    fn browser_issue_times_out() {
        for s in Scenario::browser_issue("Firefox", 5).generate(&mut rng()) {
            assert_eq!(s.user_agent.user_agent_software_name, "Firefox");
            assert_eq!(s.protocol.http_res_code, "408");
            assert!((12000.0..15000.0).contains(&s.timings.ts_page));
        }
    }

    #[test]
    fn recover_is_healthy() {
        for s in Scenario::recover(5).generate(&mut rng()) {
            assert_eq!(s.protocol.http_res_code, "200");
            assert_eq!(s.tcp.tcp_error_cnt, 0);
            assert!((1000.0..2000.0).contains(&s.timings.ts_page));
            assert!((500.0..1000.0).contains(&s.timings.ts_page_res));
        }
    }

    #[test]
    fn trigger_emits_through_the_fanout() {
        let fanout = Fanout::new(Arc::new(NullSink), Arc::new(Dispatcher::new()));
        assert!(trigger(&Scenario::error_spike(3), &fanout).is_some());
        assert!(trigger(&Scenario::recover(0), &fanout).is_none());
    }
}
