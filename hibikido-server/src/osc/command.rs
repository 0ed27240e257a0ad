//! Inbound command parsing
//!
//! Maps OSC messages (address + typed argument tuple) to the typed
//! `Command` enum. Argument order is load-bearing; `add_segment` carries
//! its range as literal `"start"` / `"end"` keyword tokens followed by the
//! value.

use rosc::{OscMessage, OscType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    UnknownAddress(String),

    #[error("{addr}: {reason}")]
    BadArguments { addr: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Invoke {
        text: String,
    },
    AddRecording {
        path: String,
        description: String,
    },
    AddSegment {
        path: String,
        description: String,
        start: f64,
        end: f64,
    },
    AddEffect {
        path: String,
        metadata: serde_json::Value,
    },
    AddPreset {
        description: String,
        metadata: serde_json::Value,
    },
    RebuildIndex,
    Stats,
    ListSegments {
        limit: usize,
    },
    GetSegmentField {
        id: u64,
        field_path: String,
    },
    GenerateDescription {
        collection: String,
        id: u64,
        force: bool,
    },
    Save,
    Stop,
}

impl Command {
    /// True for commands that run on the ingest worker rather than the
    /// dispatch task.
    pub fn is_long_running(&self) -> bool {
        matches!(
            self,
            Command::AddRecording { .. }
                | Command::AddSegment { .. }
                | Command::RebuildIndex
                | Command::GenerateDescription { .. }
        )
    }
}

pub fn parse(msg: &OscMessage) -> Result<Command, CommandError> {
    let addr = msg.addr.as_str();
    match addr {
        "/invoke" => Ok(Command::Invoke {
            text: required_str(msg, 0, "invocation text")?,
        }),
        "/add_recording" => Ok(Command::AddRecording {
            path: required_str(msg, 0, "file path")?,
            description: required_str(msg, 1, "description")?,
        }),
        "/add_segment" => parse_add_segment(msg),
        "/add_effect" => Ok(Command::AddEffect {
            path: required_str(msg, 0, "effect path")?,
            metadata: json_arg(msg, 1)?,
        }),
        "/add_preset" => Ok(Command::AddPreset {
            description: required_str(msg, 0, "description")?,
            metadata: json_arg(msg, 1)?,
        }),
        "/rebuild_index" => Ok(Command::RebuildIndex),
        "/stats" => Ok(Command::Stats),
        "/list_segments" => {
            let limit = match msg.args.first() {
                None => 10,
                Some(arg) => int_value(arg)
                    .filter(|v| *v >= 0)
                    .ok_or_else(|| bad(addr, "limit must be a non-negative integer"))?
                    as usize,
            };
            Ok(Command::ListSegments { limit })
        }
        "/get_segment_field" => Ok(Command::GetSegmentField {
            id: required_int(msg, 0, "segment id")? as u64,
            field_path: required_str(msg, 1, "field path")?,
        }),
        "/generate_description" => {
            let collection = required_str(msg, 0, "collection")?;
            if collection != "segments" && collection != "recordings" {
                return Err(bad(addr, "collection must be segments or recordings"));
            }
            let id = required_int(msg, 1, "entity id")? as u64;
            let force = match msg.args.get(2) {
                None => false,
                Some(arg) if str_value(arg).as_deref() == Some("force") => true,
                Some(_) => return Err(bad(addr, "third argument must be the token \"force\"")),
            };
            Ok(Command::GenerateDescription {
                collection,
                id,
                force,
            })
        }
        "/save" => Ok(Command::Save),
        "/stop" => Ok(Command::Stop),
        other => Err(CommandError::UnknownAddress(other.to_string())),
    }
}

fn parse_add_segment(msg: &OscMessage) -> Result<Command, CommandError> {
    let addr = msg.addr.as_str();
    let path = required_str(msg, 0, "source path")?;
    let description = required_str(msg, 1, "description")?;

    let rest = &msg.args[2..];
    if rest.len() % 2 != 0 {
        return Err(bad(addr, "range arguments must be keyword/value pairs"));
    }

    let mut start = 0.0f64;
    let mut end = 1.0f64;
    for pair in rest.chunks(2) {
        let key = str_value(&pair[0]).ok_or_else(|| bad(addr, "range keyword must be a string"))?;
        let value =
            float_value(&pair[1]).ok_or_else(|| bad(addr, "range value must be a float"))?;
        match key.as_str() {
            "start" => start = value,
            "end" => end = value,
            other => return Err(bad(addr, &format!("unknown range keyword: {other}"))),
        }
    }

    if !(0.0..1.0).contains(&start) || end <= start || end > 1.0 {
        return Err(bad(addr, "invalid start/end values (must be 0.0-1.0)"));
    }

    Ok(Command::AddSegment {
        path,
        description,
        start,
        end,
    })
}

fn bad(addr: &str, reason: &str) -> CommandError {
    CommandError::BadArguments {
        addr: addr.to_string(),
        reason: reason.to_string(),
    }
}

fn str_value(arg: &OscType) -> Option<String> {
    match arg {
        OscType::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn float_value(arg: &OscType) -> Option<f64> {
    match arg {
        OscType::Float(f) => Some(*f as f64),
        OscType::Double(d) => Some(*d),
        OscType::Int(i) => Some(*i as f64),
        OscType::Long(l) => Some(*l as f64),
        _ => None,
    }
}

fn int_value(arg: &OscType) -> Option<i64> {
    match arg {
        OscType::Int(i) => Some(*i as i64),
        OscType::Long(l) => Some(*l),
        OscType::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn required_str(msg: &OscMessage, position: usize, what: &str) -> Result<String, CommandError> {
    let value = msg
        .args
        .get(position)
        .and_then(str_value)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if value.is_empty() {
        return Err(bad(&msg.addr, &format!("{what} required")));
    }
    Ok(value)
}

fn required_int(msg: &OscMessage, position: usize, what: &str) -> Result<i64, CommandError> {
    msg.args
        .get(position)
        .and_then(int_value)
        .filter(|v| *v >= 0)
        .ok_or_else(|| bad(&msg.addr, &format!("{what} required")))
}

fn json_arg(msg: &OscMessage, position: usize) -> Result<serde_json::Value, CommandError> {
    let raw = msg
        .args
        .get(position)
        .and_then(str_value)
        .unwrap_or_else(|| "{}".to_string());
    serde_json::from_str(&raw).map_err(|_| bad(&msg.addr, "invalid metadata JSON"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(addr: &str, args: Vec<OscType>) -> OscMessage {
        OscMessage {
            addr: addr.to_string(),
            args,
        }
    }

    #[test]
    fn invoke_requires_text() {
        let cmd = parse(&msg("/invoke", vec![OscType::String("atmospheric".into())])).unwrap();
        assert_eq!(
            cmd,
            Command::Invoke {
                text: "atmospheric".into()
            }
        );

        assert!(parse(&msg("/invoke", vec![])).is_err());
        assert!(parse(&msg("/invoke", vec![OscType::String("   ".into())])).is_err());
    }

    #[test]
    fn add_segment_keyword_tokens() {
        let cmd = parse(&msg(
            "/add_segment",
            vec![
                OscType::String("field.wav".into()),
                OscType::String("wind gust".into()),
                OscType::String("start".into()),
                OscType::Float(0.25),
                OscType::String("end".into()),
                OscType::Float(0.5),
            ],
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::AddSegment {
                path: "field.wav".into(),
                description: "wind gust".into(),
                start: 0.25,
                end: 0.5,
            }
        );
    }

    #[test]
    fn add_segment_defaults_to_full_range() {
        let cmd = parse(&msg(
            "/add_segment",
            vec![
                OscType::String("field.wav".into()),
                OscType::String("wind gust".into()),
            ],
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::AddSegment {
                path: "field.wav".into(),
                description: "wind gust".into(),
                start: 0.0,
                end: 1.0,
            }
        );
    }

    #[test]
    fn add_segment_rejects_bad_ranges() {
        for (start, end) in [(0.5, 0.5), (0.8, 0.2), (-0.1, 0.5), (0.0, 1.5)] {
            let result = parse(&msg(
                "/add_segment",
                vec![
                    OscType::String("field.wav".into()),
                    OscType::String("x".into()),
                    OscType::String("start".into()),
                    OscType::Float(start),
                    OscType::String("end".into()),
                    OscType::Float(end),
                ],
            ));
            assert!(result.is_err(), "range {start}..{end} should be rejected");
        }
    }

    #[test]
    fn add_preset_parses_metadata_json() {
        let cmd = parse(&msg(
            "/add_preset",
            vec![
                OscType::String("shimmering tail".into()),
                OscType::String(r#"{"effect_path":"fx/reverb.amxd","parameters":[0.3,0.7]}"#.into()),
            ],
        ))
        .unwrap();
        match cmd {
            Command::AddPreset { metadata, .. } => {
                assert_eq!(metadata["effect_path"], "fx/reverb.amxd");
            }
            other => panic!("unexpected: {other:?}"),
        }

        assert!(parse(&msg(
            "/add_preset",
            vec![
                OscType::String("x".into()),
                OscType::String("{not json".into()),
            ],
        ))
        .is_err());
    }

    #[test]
    fn generate_description_force_token() {
        let cmd = parse(&msg(
            "/generate_description",
            vec![
                OscType::String("segments".into()),
                OscType::Int(4),
                OscType::String("force".into()),
            ],
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::GenerateDescription {
                collection: "segments".into(),
                id: 4,
                force: true,
            }
        );

        assert!(parse(&msg(
            "/generate_description",
            vec![
                OscType::String("effects".into()),
                OscType::Int(4),
            ],
        ))
        .is_err());
    }

    #[test]
    fn list_segments_defaults_to_ten() {
        assert_eq!(
            parse(&msg("/list_segments", vec![])).unwrap(),
            Command::ListSegments { limit: 10 }
        );
        assert_eq!(
            parse(&msg("/list_segments", vec![OscType::Int(3)])).unwrap(),
            Command::ListSegments { limit: 3 }
        );
    }

    #[test]
    fn unknown_address_is_reported() {
        let err = parse(&msg("/nope", vec![])).unwrap_err();
        assert!(matches!(err, CommandError::UnknownAddress(_)));
    }

    #[test]
    fn long_running_classification() {
        assert!(Command::RebuildIndex.is_long_running());
        assert!(Command::AddRecording {
            path: "a".into(),
            description: "b".into()
        }
        .is_long_running());
        assert!(!Command::Stats.is_long_running());
        assert!(!Command::Invoke { text: "x".into() }.is_long_running());
    }
}
