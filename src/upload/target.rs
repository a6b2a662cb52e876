use crate::error::UploadError;
use reqwest::Url;

/// Muxer and sink elements for an upload address.
///
/// `rtmp://` and `rtmps://` go through FLV, `udp://` and `tcp://` carry MPEG-TS.
pub fn sink_elements(address: &str) -> Result<String, UploadError> {
    let unavailable = |details: &str| UploadError::SinkUnavailable {
        sink: address.to_string(),
        details: details.to_string(),
    };

    let url = Url::parse(address.trim()).map_err(|e| unavailable(&e.to_string()))?;

    match url.scheme() {
        "rtmp" | "rtmps" => Ok(format!(
            "flvmux streamable=true ! rtmpsink location=\"{} live=1\"",
            url.as_str()
        )),
        scheme @ ("udp" | "tcp") => {
            let host = url
                .host_str()
                .ok_or_else(|| unavailable("missing host"))?;
            let port = url.port().ok_or_else(|| unavailable("missing port"))?;
            let sink = if scheme == "udp" { "udpsink" } else { "tcpclientsink" };
            Ok(format!(
                "mpegtsmux ! {} host={} port={}",
                sink,
                host.trim_start_matches('[').trim_end_matches(']'),
                port
            ))
        }
        other => Err(unavailable(&format!("unsupported scheme '{}'", other))),
    }
}
