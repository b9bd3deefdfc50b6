use crate::config::BandwidthHint;
use crate::wire::SessionDescription;

/// Replaces the first bandwidth hint line in `sdp`. Descriptions without the
/// hint are returned unchanged.
pub fn rewrite_bandwidth(sdp: &str, bandwidth: &BandwidthHint) -> String {
    if bandwidth.hint.is_empty() {
        return sdp.to_string();
    }
    sdp.replacen(&bandwidth.hint, &bandwidth.replacement, 1)
}

pub fn transform_outgoing(
    mut description: SessionDescription,
    bandwidth: Option<&BandwidthHint>,
) -> SessionDescription {
    if let Some(bandwidth) = bandwidth {
        description.sdp = rewrite_bandwidth(&description.sdp, bandwidth);
    }
    description
}
