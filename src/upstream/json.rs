//! JSON parsing helper for upstream responses.

use anyhow::Result;

/// Parse JSON, attributing failures to the serde path where they occurred
/// (`[3].datetime: invalid type …` beats `invalid type at line 1 column 812`).
pub fn parse_json_with_path<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    let deserializer = &mut serde_json::Deserializer::from_str(body);
    match serde_path_to_error::deserialize(deserializer) {
        Ok(value) => Ok(value),
        Err(err) => {
            let path = err.path().to_string();
            let inner = err.into_inner();
            if path.is_empty() || path == "." {
                Err(anyhow::anyhow!("{inner}"))
            } else {
                Err(anyhow::anyhow!("at {path}: {inner}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn parses_well_formed_bodies() {
        let value: Value = parse_json_with_path(r#"[{"id": 1}]"#).unwrap();
        assert_eq!(value[0]["id"], 1);
    }

    #[test]
    fn reports_the_failing_path() {
        #[derive(serde::Deserialize, Debug)]
        struct Row {
            #[allow(dead_code)]
            id: i64,
        }
        let err = parse_json_with_path::<Vec<Row>>(r#"[{"id": 1}, {"id": "two"}]"#).unwrap_err();
        assert!(err.to_string().contains("[1].id"), "got: {err}");
    }
}
