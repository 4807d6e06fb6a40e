//! Control response parsers
//!
//! A control response is one of:
//!
//! ```text
//! OK
//! ERROR\r\n<code>\r\n<message>
//! SYNC ERROR
//! ```
//!
//! Batched requests get one such response per command, concatenated in
//! request order.

use crate::error::{ClientError, Result};
use crate::transport::TransportError;

/// Parse the response to a single control command
pub fn parse_control_response(body: &str, operation: &str) -> Result<()> {
    let mut lines = body.lines();
    parse_next(&mut lines, operation)
}

/// Parse a batched response, one result per operation in order
///
/// Operations missing from the body get a protocol error.
pub fn parse_bulk_response<S: AsRef<str>>(body: &str, operations: &[S]) -> Vec<Result<()>> {
    let mut lines = body.lines();
    operations
        .iter()
        .map(|operation| parse_next(&mut lines, operation.as_ref()))
        .collect()
}

fn parse_next<'a, I>(lines: &mut I, operation: &str) -> Result<()>
where
    I: Iterator<Item = &'a str>,
{
    let status = lines.by_ref().map(str::trim).find(|line| !line.is_empty());

    match status {
        Some("OK") => Ok(()),
        Some("SYNC ERROR") => Err(ClientError::SyncError(operation.to_string())),
        Some("ERROR") => {
            let code_line = lines.next().unwrap_or_default().trim();
            let message = lines.next().unwrap_or_default().trim();
            match code_line.parse::<i32>() {
                Ok(code) => Err(ClientError::control(operation, code, message)),
                Err(_) => Err(TransportError::ProtocolError(format!(
                    "Invalid error code in '{}' response: {:?}",
                    operation, code_line
                ))
                .into()),
            }
        }
        Some(other) => Err(TransportError::ProtocolError(format!(
            "Unexpected '{}' response: {}",
            operation, other
        ))
        .into()),
        None => Err(TransportError::ProtocolError(format!(
            "Missing response for '{}'",
            operation
        ))
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ok() {
        assert!(parse_control_response("OK\r\n", "add").is_ok());
    }

    #[test]
    fn test_parse_error() {
        let err = parse_control_response("ERROR\r\n17\r\nBad Data Adapter name\r\n", "add")
            .unwrap_err();
        assert_eq!(err, ClientError::control("add", 17, "Bad Data Adapter name"));
    }

    #[test]
    fn test_parse_sync_error() {
        let err = parse_control_response("SYNC ERROR\r\n", "destroy").unwrap_err();
        assert_eq!(err, ClientError::SyncError("destroy".to_string()));
    }

    #[test]
    fn test_parse_unexpected() {
        let err = parse_control_response("<html>", "start").unwrap_err();
        assert!(matches!(
            err,
            ClientError::Transport(TransportError::ProtocolError(_))
        ));
        assert!(parse_control_response("", "start").is_err());
    }

    #[test]
    fn test_parse_bulk() {
        let body = "OK\r\nERROR\r\n19\r\nItem not found\r\nOK\r\n";
        let results = parse_bulk_response(body, &["add", "add", "add"]);

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert_eq!(
            results[1].clone().unwrap_err(),
            ClientError::control("add", 19, "Item not found")
        );
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_parse_bulk_with_empty_error_message() {
        let body = "ERROR\r\n19\r\n\r\nOK\r\n";
        let results = parse_bulk_response(body, &["add", "add"]);
        assert_eq!(results[0].clone().unwrap_err(), ClientError::control("add", 19, ""));
        assert!(results[1].is_ok());
    }

    #[test]
    fn test_parse_bulk_short_body() {
        let results = parse_bulk_response("OK\r\n", &["add", "add"]);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
