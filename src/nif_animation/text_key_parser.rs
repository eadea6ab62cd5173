// src/nif_animation/text_key_parser.rs

use bevy::log::debug;

use crate::nif::types::{TextKey, TextKeyList};

use super::parser_helpers::{KNOWN_PAYLOAD_PREFIXES, split_marker};

/// Meaning of one text key line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextKeyEventKind {
    Start,
    End,
    LoopStart,
    LoopStop,
    Hit,
    Eject,
    NoBlend,
    RespectEndKey,
    Morph(String),
    Script(String),
    SoundPath(String),
    Sound(String),
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextKeyEvent {
    pub time: f32,
    pub kind: TextKeyEventKind,
}

/// Parses a single line. Blank lines yield `None`.
pub fn parse_text_key_line(line: &str) -> Option<TextKeyEventKind> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let kind = match line.to_lowercase().as_str() {
        "start" => TextKeyEventKind::Start,
        "end" => TextKeyEventKind::End,
        "loop start" | "loopstart" => TextKeyEventKind::LoopStart,
        "loop stop" | "loopstop" => TextKeyEventKind::LoopStop,
        "hit" => TextKeyEventKind::Hit,
        "eject" => TextKeyEventKind::Eject,
        "noblend" => TextKeyEventKind::NoBlend,
        "respectendkey" => TextKeyEventKind::RespectEndKey,
        _ => parse_payload_marker(line),
    };
    Some(kind)
}

fn parse_payload_marker(line: &str) -> TextKeyEventKind {
    let Some((prefix, value)) = split_marker(line) else {
        return TextKeyEventKind::Other(line.to_string());
    };
    let prefix = prefix.to_lowercase();
    if !KNOWN_PAYLOAD_PREFIXES.contains(&prefix.as_str()) || value.is_empty() {
        debug!("Unrecognized text key '{}'", line);
        return TextKeyEventKind::Other(line.to_string());
    }
    match prefix.as_str() {
        "morph" => TextKeyEventKind::Morph(value.to_lowercase()),
        "script" => TextKeyEventKind::Script(value.to_string()),
        "soundpath" => TextKeyEventKind::SoundPath(value.replace('\\', "/")),
        _ => TextKeyEventKind::Sound(value.to_string()),
    }
}

/// One event per non-blank line of `key`.
pub fn parse_text_key(key: &TextKey) -> Vec<TextKeyEvent> {
    key.value
        .lines()
        .filter_map(parse_text_key_line)
        .map(|kind| TextKeyEvent {
            time: key.time,
            kind,
        })
        .collect()
}

pub fn parse_text_keys(keys: &TextKeyList) -> Vec<TextKeyEvent> {
    keys.iter().flat_map(parse_text_key).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_markers() {
        assert_eq!(parse_text_key_line(" Hit "), Some(TextKeyEventKind::Hit));
        assert_eq!(parse_text_key_line("loop start"), Some(TextKeyEventKind::LoopStart));
        assert_eq!(
            parse_text_key_line("respectEndKey"),
            Some(TextKeyEventKind::RespectEndKey)
        );
        assert_eq!(
            parse_text_key_line("morph: LeftFoot"),
            Some(TextKeyEventKind::Morph("leftfoot".into()))
        );
        assert_eq!(
            parse_text_key_line("SoundPath:fx\\gun\\fire.wav"),
            Some(TextKeyEventKind::SoundPath("fx/gun/fire.wav".into()))
        );
        assert_eq!(
            parse_text_key_line("Script:0001ABCD"),
            Some(TextKeyEventKind::Script("0001ABCD".into()))
        );
        assert_eq!(
            parse_text_key_line("Idle: Start"),
            Some(TextKeyEventKind::Other("Idle: Start".into()))
        );
        assert_eq!(parse_text_key_line("   "), None);
    }

    #[test]
    fn multiline_keys_expand() {
        let key = TextKey::new(0.25, "eject\nSound: WPNShellCasing");
        let events = parse_text_key(&key);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, TextKeyEventKind::Eject);
        assert_eq!(events[1].kind, TextKeyEventKind::Sound("WPNShellCasing".into()));
        assert!(events.iter().all(|event| event.time == 0.25));
    }
}
