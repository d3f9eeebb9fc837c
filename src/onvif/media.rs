//! Media service: profiles, stream and snapshot URIs.

use super::xml;
use crate::error::{ControlError, Result};
use crate::protocol::{Resolution, StreamOptions, StreamProfile};

pub const GET_PROFILES: &str = "<trt:GetProfiles/>";

pub fn get_stream_uri(profile_token: &str) -> String {
    format!(
        "<trt:GetStreamUri>\
         <trt:StreamSetup>\
         <tt:Stream>RTP-Unicast</tt:Stream>\
         <tt:Transport><tt:Protocol>RTSP</tt:Protocol></tt:Transport>\
         </trt:StreamSetup>\
         <trt:ProfileToken>{}</trt:ProfileToken>\
         </trt:GetStreamUri>",
        xml::escape_text(profile_token)
    )
}

pub fn get_snapshot_uri(profile_token: &str) -> String {
    format!(
        "<trt:GetSnapshotUri><trt:ProfileToken>{}</trt:ProfileToken></trt:GetSnapshotUri>",
        xml::escape_text(profile_token)
    )
}

pub fn parse_profiles(response: &str) -> Vec<StreamProfile> {
    xml::elements(response, "Profiles")
        .into_iter()
        .filter_map(|element| {
            let token = element.attribute("token")?;
            let name = element.text("Name").unwrap_or_else(|| token.clone());
            let mut profile = StreamProfile::new(token, name);

            if let Some(encoder) = element.child("VideoEncoderConfiguration") {
                profile.encoding = encoder.text("Encoding");
                profile.resolution = encoder.child("Resolution").and_then(|r| {
                    let width = r.text("Width")?.parse().ok()?;
                    let height = r.text("Height")?.parse().ok()?;
                    Some(Resolution::new(width, height))
                });
                if let Some(rate) = encoder.child("RateControl") {
                    profile.frame_rate = rate.text("FrameRateLimit").and_then(|v| v.parse().ok());
                    profile.bitrate = rate.text("BitrateLimit").and_then(|v| v.parse().ok());
                }
                if let Some(gop) = encoder.child("H264").and_then(|h| h.text("GovLength")) {
                    profile.parameters.insert("gov_length".to_string(), gop);
                }
                if let Some(quality) = encoder.text("Quality") {
                    profile.parameters.insert("quality".to_string(), quality);
                }
            }

            if let Some(source) = element.child("VideoSourceConfiguration")
                && let Some(source_token) = source.text("SourceToken")
            {
                profile
                    .parameters
                    .insert("video_source".to_string(), source_token);
            }

            profile.ptz_configuration = element
                .child("PTZConfiguration")
                .and_then(|ptz| ptz.attribute("token"));

            Some(profile)
        })
        .collect()
}

/// Pick the profile for a stream request.
///
/// Priority: requested token, exact resolution, closest resolution by
/// `|Δw| + |Δh|`, the configured default token, then the first profile.
pub fn select_profile<'a>(
    profiles: &'a [StreamProfile],
    options: &StreamOptions,
    default_token: Option<&str>,
) -> Option<&'a StreamProfile> {
    if let Some(token) = options.profile_token.as_deref() {
        return profiles.iter().find(|p| p.token == token);
    }

    if let Some(wanted) = options.resolution {
        let sized = profiles
            .iter()
            .filter_map(|p| p.resolution.map(|r| (p, r.distance(&wanted))));
        if let Some((profile, _)) = sized.min_by_key(|(_, distance)| *distance) {
            return Some(profile);
        }
    }

    default_token
        .and_then(|token| profiles.iter().find(|p| p.token == token))
        .or_else(|| profiles.first())
}

/// `Uri` element of a GetStreamUri/GetSnapshotUri response.
pub fn parse_uri(response: &str) -> Result<String> {
    xml::text(response, "Uri")
        .ok_or_else(|| ControlError::Protocol("response carries no Uri".to_string()))
}
