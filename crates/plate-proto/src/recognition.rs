use serde::{Deserialize, Serialize};

/// Body of `POST /ocr/read_lp`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitLpResponse {
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub show_alert: bool,
}

/// Body of `GET /ocr/is_allowed`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessResponse {
    #[serde(default)]
    pub is_allowed: Option<bool>,
}

/// A plate the service actually read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlateReading {
    pub plate_number: String,
    pub alert: bool,
}

impl SubmitLpResponse {
    /// A missing or blank `result` means the service could not read the plate.
    pub fn into_reading(self) -> Option<PlateReading> {
        let plate_number = self.result?.trim().to_string();
        if plate_number.is_empty() {
            return None;
        }
        Some(PlateReading { plate_number, alert: self.show_alert })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> SubmitLpResponse {
        serde_json::from_str(s).unwrap()
    }

    #[test]
    fn reading_with_alert() {
        let r = parse(r#"{"result":"MH12AB1234","show_alert":true}"#).into_reading().unwrap();
        assert_eq!(r, PlateReading { plate_number: "MH12AB1234".into(), alert: true });
    }

    #[test]
    fn empty_or_null_result_is_unread() {
        assert!(parse(r#"{"result":"","show_alert":true}"#).into_reading().is_none());
        assert!(parse(r#"{"result":"  ","show_alert":false}"#).into_reading().is_none());
        assert!(parse(r#"{"result":null,"show_alert":true}"#).into_reading().is_none());
        assert!(parse(r#"{}"#).into_reading().is_none());
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        let r = parse(r#"{"result":" KA01X1\n","show_alert":true}"#).into_reading().unwrap();
        assert_eq!(r.plate_number, "KA01X1");
    }

    #[test]
    fn show_alert_defaults_to_false() {
        let r = parse(r#"{"result":"KA01X1"}"#).into_reading().unwrap();
        assert!(!r.alert);
    }
}
