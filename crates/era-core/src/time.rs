/// Return the current UTC timestamp in RFC 3339 format.
pub fn utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utc_now_is_rfc3339() {
        let ts = utc_now();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
