//! PTZ service requests and preset parsing.

use super::xml;
use crate::error::{ControlError, Result};
use crate::protocol::{Preset, PtzMovement, PtzPosition};

const DEFAULT_SPEED: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PtzVector {
    pub pan: f32,
    pub tilt: f32,
    pub zoom: f32,
}

impl PtzVector {
    pub fn new(pan: f32, tilt: f32, zoom: f32) -> Self {
        Self { pan, tilt, zoom }
    }

    pub fn uniform(value: f32) -> Self {
        Self::new(value, value, value)
    }

    fn to_xml(self) -> String {
        format!(
            r#"<tt:PanTilt x="{}" y="{}"/><tt:Zoom x="{}"/>"#,
            self.pan, self.tilt, self.zoom
        )
    }
}

/// The three move shapes a PTZ service accepts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PtzCommand {
    Continuous { velocity: PtzVector },
    Absolute { position: PtzVector, speed: PtzVector },
    Relative { translation: PtzVector, speed: PtzVector },
}

impl PtzCommand {
    /// Shape is decided by the movement flags alone.
    pub fn from_movement(movement: &PtzMovement) -> Self {
        let speed = movement.speed.unwrap_or(DEFAULT_SPEED);
        let deltas = PtzVector::new(movement.pan, movement.tilt, movement.zoom);

        if movement.continuous {
            PtzCommand::Continuous {
                velocity: PtzVector::new(
                    movement.pan * speed,
                    movement.tilt * speed,
                    movement.zoom * speed,
                ),
            }
        } else if movement.absolute {
            PtzCommand::Absolute {
                position: deltas,
                speed: PtzVector::uniform(speed),
            }
        } else {
            PtzCommand::Relative {
                translation: deltas,
                speed: PtzVector::uniform(speed),
            }
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            PtzCommand::Continuous { .. } => "ContinuousMove",
            PtzCommand::Absolute { .. } => "AbsoluteMove",
            PtzCommand::Relative { .. } => "RelativeMove",
        }
    }

    pub fn to_body(&self, profile_token: &str) -> String {
        let payload = match self {
            PtzCommand::Continuous { velocity } => {
                format!("<tptz:Velocity>{}</tptz:Velocity>", velocity.to_xml())
            }
            PtzCommand::Absolute { position, speed } => format!(
                "<tptz:Position>{}</tptz:Position><tptz:Speed>{}</tptz:Speed>",
                position.to_xml(),
                speed.to_xml()
            ),
            PtzCommand::Relative { translation, speed } => format!(
                "<tptz:Translation>{}</tptz:Translation><tptz:Speed>{}</tptz:Speed>",
                translation.to_xml(),
                speed.to_xml()
            ),
        };

        format!(
            "<tptz:{action}><tptz:ProfileToken>{token}</tptz:ProfileToken>{payload}</tptz:{action}>",
            action = self.action(),
            token = xml::escape_text(profile_token),
            payload = payload,
        )
    }
}

fn profile_request(action: &str, profile_token: &str, extra: &str) -> String {
    format!(
        "<tptz:{action}><tptz:ProfileToken>{token}</tptz:ProfileToken>{extra}</tptz:{action}>",
        action = action,
        token = xml::escape_text(profile_token),
        extra = extra,
    )
}

pub fn stop(profile_token: &str) -> String {
    profile_request(
        "Stop",
        profile_token,
        "<tptz:PanTilt>true</tptz:PanTilt><tptz:Zoom>true</tptz:Zoom>",
    )
}

pub fn goto_home(profile_token: &str) -> String {
    profile_request("GotoHomePosition", profile_token, "")
}

pub fn get_presets(profile_token: &str) -> String {
    profile_request("GetPresets", profile_token, "")
}

pub fn set_preset(profile_token: &str, name: &str) -> String {
    profile_request(
        "SetPreset",
        profile_token,
        &format!("<tptz:PresetName>{}</tptz:PresetName>", xml::escape_text(name)),
    )
}

pub fn goto_preset(profile_token: &str, preset_token: &str) -> String {
    profile_request(
        "GotoPreset",
        profile_token,
        &format!(
            "<tptz:PresetToken>{}</tptz:PresetToken>",
            xml::escape_text(preset_token)
        ),
    )
}

pub fn parse_presets(response: &str) -> Vec<Preset> {
    xml::elements(response, "Preset")
        .into_iter()
        .filter_map(|element| {
            let token = element.attribute("token")?;
            let name = element.text("Name").unwrap_or_else(|| token.clone());
            let position = element.child("PTZPosition").and_then(|position| {
                let pan_tilt = position.child("PanTilt")?;
                let pan = pan_tilt.attribute("x")?.parse().ok()?;
                let tilt = pan_tilt.attribute("y")?.parse().ok()?;
                let zoom = position
                    .child("Zoom")
                    .and_then(|z| z.attribute("x"))
                    .and_then(|x| x.parse().ok())
                    .unwrap_or(0.0);
                Some(PtzPosition { pan, tilt, zoom })
            });
            Some(Preset {
                token,
                name,
                position,
            })
        })
        .collect()
}

pub fn parse_preset_token(response: &str) -> Result<String> {
    xml::text(response, "PresetToken")
        .ok_or_else(|| ControlError::Protocol("SetPreset response carries no token".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_shape_follows_flags() {
        let relative = PtzCommand::from_movement(&PtzMovement::relative(0.1, -0.2, 0.0));
        assert_eq!(relative.action(), "RelativeMove");

        let absolute = PtzCommand::from_movement(&PtzMovement::absolute(0.5, 0.5, 0.1));
        assert_eq!(absolute.action(), "AbsoluteMove");

        let continuous = PtzCommand::from_movement(&PtzMovement::continuous(0.5, 0.0, 0.0));
        assert_eq!(continuous.action(), "ContinuousMove");
    }

    #[test]
    fn test_continuous_velocity_scaled_without_speed_block() {
        let command =
            PtzCommand::from_movement(&PtzMovement::continuous(0.5, -0.25, 0.0).with_speed(0.5));
        assert_eq!(
            command,
            PtzCommand::Continuous {
                velocity: PtzVector::new(0.25, -0.125, 0.0)
            }
        );

        let body = command.to_body("main");
        assert!(body.contains(r#"<tt:PanTilt x="0.25" y="-0.125"/>"#));
        assert!(!body.contains("Speed"));
    }

    #[test]
    fn test_relative_move_carries_uniform_speed() {
        let command = PtzCommand::from_movement(&PtzMovement::relative(0.1, 0.2, 0.0));
        assert_eq!(
            command,
            PtzCommand::Relative {
                translation: PtzVector::new(0.1, 0.2, 0.0),
                speed: PtzVector::uniform(1.0),
            }
        );

        let body = command.to_body("main");
        assert!(body.starts_with("<tptz:RelativeMove><tptz:ProfileToken>main</tptz:ProfileToken>"));
        assert!(body.contains(r#"<tptz:Speed><tt:PanTilt x="1" y="1"/><tt:Zoom x="1"/></tptz:Speed>"#));
    }

    #[test]
    fn test_absolute_move_carries_position_and_uniform_speed() {
        let command =
            PtzCommand::from_movement(&PtzMovement::absolute(0.5, -0.5, 0.25).with_speed(0.75));
        assert_eq!(
            command,
            PtzCommand::Absolute {
                position: PtzVector::new(0.5, -0.5, 0.25),
                speed: PtzVector::uniform(0.75),
            }
        );

        let body = command.to_body("main");
        assert!(body.starts_with("<tptz:AbsoluteMove><tptz:ProfileToken>main</tptz:ProfileToken>"));
        assert!(body.contains(
            r#"<tptz:Position><tt:PanTilt x="0.5" y="-0.5"/><tt:Zoom x="0.25"/></tptz:Position>"#
        ));
        assert!(body.contains(
            r#"<tptz:Speed><tt:PanTilt x="0.75" y="0.75"/><tt:Zoom x="0.75"/></tptz:Speed>"#
        ));
        assert!(!body.contains("Translation"));
        assert!(!body.contains("Velocity"));
    }

    #[test]
    fn test_set_preset_escapes_name() {
        let body = set_preset("main", "Gate <north>");
        assert!(body.contains("<tptz:PresetName>Gate &lt;north&gt;</tptz:PresetName>"));
    }

    #[test]
    fn test_parse_presets() {
        let response = r#"<tptz:GetPresetsResponse>
            <tptz:Preset token="1">
                <tt:Name>Gate</tt:Name>
                <tt:PTZPosition>
                    <tt:PanTilt x="0.5" y="-0.1" space="http://www.onvif.org/ver10/tptz/PanTiltSpaces/PositionGenericSpace"/>
                    <tt:Zoom x="0.2"/>
                </tt:PTZPosition>
            </tptz:Preset>
            <tptz:Preset token="2"><tt:Name>Yard</tt:Name></tptz:Preset>
        </tptz:GetPresetsResponse>"#;

        let presets = parse_presets(response);
        assert_eq!(presets.len(), 2);
        assert_eq!(presets[0].name, "Gate");
        assert_eq!(
            presets[0].position,
            Some(PtzPosition {
                pan: 0.5,
                tilt: -0.1,
                zoom: 0.2
            })
        );
        assert_eq!(presets[1].token, "2");
        assert_eq!(presets[1].position, None);
    }

    #[test]
    fn test_parse_preset_token() {
        let response = "<tptz:SetPresetResponse><tptz:PresetToken>7</tptz:PresetToken></tptz:SetPresetResponse>";
        assert_eq!(parse_preset_token(response).unwrap(), "7");
    }
}
