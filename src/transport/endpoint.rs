use anyhow::{anyhow, Context, Result};

pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_MQTTS_PORT: u16 = 8883;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

/// Parse a broker address.
///
/// Supports formats:
/// - `host` or `host:port` (plain TCP, port 1883 by default)
/// - `mqtt://host:port` / `tcp://host:port` (plain TCP)
/// - `mqtts://host:port` / `ssl://host:port` (TLS, port 8883 by default)
/// - `[ipv6]:port` (IPv6 with brackets)
pub fn parse_mqtt_endpoint(addr: &str) -> Result<MqttEndpoint> {
    let mut use_tls = false;
    let mut remainder = addr.trim();
    if remainder.is_empty() {
        return Err(anyhow!("MQTT broker address is empty"));
    }

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest.trim_end_matches('/');
    }

    let default_port = if use_tls {
        DEFAULT_MQTTS_PORT
    } else {
        DEFAULT_MQTT_PORT
    };
    let (host, port) = split_host_port(remainder, default_port)?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str, default_port: u16) -> Result<(String, u16)> {
    // Handle IPv6 addresses in brackets: [::1]:1883
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = match rest.strip_prefix(':') {
            Some(port) => parse_port(port, addr)?,
            None if rest.is_empty() => default_port,
            None => return Err(anyhow!("invalid MQTT address: {}", addr)),
        };
        return Ok((host.to_string(), port));
    }

    match addr.rsplit_once(':') {
        Some((host, port)) => Ok((host.to_string(), parse_port(port, addr)?)),
        None => Ok((addr.to_string(), default_port)),
    }
}

fn parse_port(port: &str, addr: &str) -> Result<u16> {
    port.parse()
        .with_context(|| format!("invalid MQTT port in {}", addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_host_port() {
        let endpoint = parse_mqtt_endpoint("broker.local:1884").unwrap();
        assert_eq!(
            endpoint,
            MqttEndpoint {
                host: "broker.local".into(),
                port: 1884,
                use_tls: false
            }
        );
    }

    #[test]
    fn schemes_select_tls_and_default_ports() {
        let endpoint = parse_mqtt_endpoint("mqtts://broker.local").unwrap();
        assert!(endpoint.use_tls);
        assert_eq!(endpoint.port, DEFAULT_MQTTS_PORT);

        let endpoint = parse_mqtt_endpoint("tcp://10.0.0.2").unwrap();
        assert!(!endpoint.use_tls);
        assert_eq!(endpoint.port, DEFAULT_MQTT_PORT);
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let endpoint = parse_mqtt_endpoint("[::1]:1883").unwrap();
        assert_eq!(endpoint.host, "::1");
        assert_eq!(endpoint.port, 1883);
        assert_eq!(parse_mqtt_endpoint("[::1]").unwrap().port, DEFAULT_MQTT_PORT);
    }

    #[test]
    fn rejects_bad_addresses() {
        assert!(parse_mqtt_endpoint("").is_err());
        assert!(parse_mqtt_endpoint("http://broker:80").is_err());
        assert!(parse_mqtt_endpoint("broker:notaport").is_err());
        assert!(parse_mqtt_endpoint(":1883").is_err());
        assert!(parse_mqtt_endpoint("[::1").is_err());
    }
}
