use crate::error::ConfigError;

use reqwest::Url;

/// Parses the backend addresses given on the command line. At least one address is required and
/// each one must be an absolute http(s) URL with a host, for example: http://localhost:8081
pub fn parse_backends(addresses: &[String]) -> Result<Vec<Url>, ConfigError> {
    if addresses.is_empty() {
        return Err(ConfigError::NoBackends);
    }

    addresses.iter().map(|a| parse_backend(a)).collect()
}

fn parse_backend(address: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidBackendAddress {
        address: address.to_string(),
        reason,
    };

    let url = Url::parse(address.trim()).map_err(|e| invalid(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses(list: &[&str]) -> Vec<String> {
        list.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_no_backends() {
        assert_eq!(parse_backends(&[]), Err(ConfigError::NoBackends));
    }

    #[test]
    fn test_keeps_configuration_order() {
        let urls = parse_backends(&addresses(&[
            "http://localhost:8082",
            "http://localhost:8081/api",
        ]))
        .unwrap();

        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0].port(), Some(8082));
        assert_eq!(urls[1].path(), "/api");
    }

    #[test]
    fn test_rejects_malformed_address() {
        let err = parse_backends(&addresses(&["http://localhost:8081", "not a url"])).unwrap_err();
        match err {
            ConfigError::InvalidBackendAddress { address, .. } => assert_eq!(address, "not a url"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_rejects_address_without_scheme() {
        // Parses as scheme "localhost" with an opaque path
        let err = parse_backends(&addresses(&["localhost:8081"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBackendAddress { .. }));
    }

    #[test]
    fn test_rejects_unsupported_scheme() {
        let err = parse_backends(&addresses(&["ftp://localhost:21"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBackendAddress { .. }));
    }
}
