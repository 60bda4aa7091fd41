use chrono::{DateTime, Local, TimeZone};

/// Short received-time label: clock time today, "Yesterday", else "Mon d".
pub fn format_mail_date<Tz: TimeZone>(received_ms: i64, now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let Some(d) = now.timezone().timestamp_millis_opt(received_ms).single() else {
        return String::new();
    };

    let today = now.date_naive();
    let day = d.date_naive();
    if day == today {
        return d.format("%I:%M %p").to_string().to_lowercase();
    }
    if today.pred_opt() == Some(day) {
        return "Yesterday".to_string();
    }
    d.format("%b %-d").to_string()
}

/// Label against the local clock; empty when the backend sent no time.
pub fn format_local(received_ms: Option<i64>) -> String {
    received_ms
        .map(|ms| format_mail_date(ms, &Local::now()))
        .unwrap_or_default()
}
