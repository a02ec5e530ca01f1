use chrono::{Local, NaiveDateTime, Utc};

/// Milliseconds since the Unix epoch, the unit used by every push event `timestamp`.
pub fn epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Local wall-clock time without zone, the representation records carry in
/// `tsServer` / `createdAt`.
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}
