//! Canonical addressing into the live set object graph
//!
//! Paths follow `live_set [tracks <n> [devices <n> [parameters <n>]]] [clip_slots <n> [clip]]`.
//! Building a path is pure: impossible component combinations are rejected
//! here, before anything touches a transport.

use std::fmt;
use thiserror::Error;

/// Root token of every path
pub const ROOT: &str = "live_set";

const TRACKS: &str = "tracks";
const DEVICES: &str = "devices";
const PARAMETERS: &str = "parameters";
const CLIP_SLOTS: &str = "clip_slots";
const CLIP: &str = "clip";

/// Structural path error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("{child} requires {parent}")]
    MissingParent {
        child: &'static str,
        parent: &'static str,
    },
    #[error("a path cannot address both a device and a clip slot")]
    Conflicting,
    #[error("malformed path '{0}'")]
    Malformed(String),
}

/// Addressing components for one target in the live set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PathComponents {
    pub track: Option<usize>,
    pub device: Option<usize>,
    pub parameter: Option<usize>,
    pub clip_slot: Option<usize>,
    pub clip: bool,
}

impl PathComponents {
    /// The live set itself
    pub fn live_set() -> Self {
        Self::default()
    }

    pub fn track(track: usize) -> Self {
        Self {
            track: Some(track),
            ..Self::default()
        }
    }

    pub fn device(track: usize, device: usize) -> Self {
        Self {
            track: Some(track),
            device: Some(device),
            ..Self::default()
        }
    }

    pub fn parameter(track: usize, device: usize, parameter: usize) -> Self {
        Self {
            track: Some(track),
            device: Some(device),
            parameter: Some(parameter),
            ..Self::default()
        }
    }

    pub fn clip_slot(track: usize, clip_slot: usize) -> Self {
        Self {
            track: Some(track),
            clip_slot: Some(clip_slot),
            ..Self::default()
        }
    }

    pub fn clip(track: usize, clip_slot: usize) -> Self {
        Self {
            clip: true,
            ..Self::clip_slot(track, clip_slot)
        }
    }

    pub fn build(&self) -> Result<LivePath, PathError> {
        build(self)
    }
}

/// A validated, canonical path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LivePath {
    text: String,
    components: PathComponents,
}

/// Render components into their canonical path.
pub fn build(components: &PathComponents) -> Result<LivePath, PathError> {
    let c = components;

    if c.parameter.is_some() && c.device.is_none() {
        return Err(PathError::MissingParent {
            child: "parameter",
            parent: "device",
        });
    }
    if c.device.is_some() && c.track.is_none() {
        return Err(PathError::MissingParent {
            child: "device",
            parent: "track",
        });
    }
    if c.clip && c.clip_slot.is_none() {
        return Err(PathError::MissingParent {
            child: "clip",
            parent: "clip slot",
        });
    }
    if c.clip_slot.is_some() && c.track.is_none() {
        return Err(PathError::MissingParent {
            child: "clip slot",
            parent: "track",
        });
    }
    if c.device.is_some() && c.clip_slot.is_some() {
        return Err(PathError::Conflicting);
    }

    let mut text = String::from(ROOT);
    let mut push = |token: &str, index: Option<usize>| {
        if let Some(i) = index {
            text.push(' ');
            text.push_str(token);
            text.push(' ');
            text.push_str(&i.to_string());
        }
    };
    push(TRACKS, c.track);
    push(DEVICES, c.device);
    push(PARAMETERS, c.parameter);
    push(CLIP_SLOTS, c.clip_slot);
    if c.clip {
        text.push(' ');
        text.push_str(CLIP);
    }

    Ok(LivePath {
        text,
        components: *c,
    })
}

impl LivePath {
    /// Path of the live set root
    pub fn root() -> Self {
        LivePath {
            text: ROOT.to_string(),
            components: PathComponents::default(),
        }
    }

    /// Parse a canonical path string back into components
    pub fn parse(text: &str) -> Result<Self, PathError> {
        let malformed = || PathError::Malformed(text.to_string());
        let mut tokens = text.split_whitespace();

        if tokens.next() != Some(ROOT) {
            return Err(malformed());
        }

        let mut components = PathComponents::default();
        while let Some(token) = tokens.next() {
            if token == CLIP {
                if components.clip {
                    return Err(malformed());
                }
                components.clip = true;
                continue;
            }

            let index: usize = tokens
                .next()
                .and_then(|t| t.parse().ok())
                .ok_or_else(malformed)?;
            let slot = match token {
                TRACKS => &mut components.track,
                DEVICES => &mut components.device,
                PARAMETERS => &mut components.parameter,
                CLIP_SLOTS => &mut components.clip_slot,
                _ => return Err(malformed()),
            };
            if slot.replace(index).is_some() {
                return Err(malformed());
            }
        }

        let path = build(&components)?;
        // Reject valid-looking but non-canonical orderings
        if path.text != tokens_joined(text) {
            return Err(malformed());
        }
        Ok(path)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn components(&self) -> &PathComponents {
        &self.components
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.text.split_whitespace()
    }

    /// True if `key` lies under this path on a token boundary.
    ///
    /// `live_set tracks 1` covers `live_set tracks 1 clip_slots 0` and
    /// `live_set tracks 1#name`, but not `live_set tracks 10`.
    pub fn is_prefix_of(&self, key: &str) -> bool {
        is_path_prefix(&self.text, key)
    }
}

fn tokens_joined(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Token-boundary prefix test shared with the state cache
pub fn is_path_prefix(prefix: &str, key: &str) -> bool {
    match key.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with(' ') || rest.starts_with('#'),
        None => false,
    }
}

impl fmt::Display for LivePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl AsRef<str> for LivePath {
    fn as_ref(&self) -> &str {
        &self.text
    }
}
