// src/runtime/message.rs
// Message payloads delivered to extensions by the host

use serde::{Deserialize, Serialize};

/// A named command with free-form properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cmd {
    pub name: String,
    #[serde(default)]
    pub properties: serde_json::Value,
}

impl Cmd {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: serde_json::Value::Null,
        }
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }
}

/// Opaque named data buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Data {
    pub name: String,
    #[serde(default)]
    pub buf: Vec<u8>,
}

impl Data {
    pub fn new(name: impl Into<String>, buf: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            buf,
        }
    }
}

/// Interleaved PCM audio frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFrame {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples_per_channel: u32,
    /// Milliseconds since the start of the session
    pub timestamp: i64,
    #[serde(default)]
    pub buf: Vec<u8>,
}

/// Raw video frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFrame {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: String,
    pub timestamp: i64,
    #[serde(default)]
    pub buf: Vec<u8>,
}

/// Any message the host may dispatch to a started extension
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Cmd(Cmd),
    Data(Data),
    AudioFrame(AudioFrame),
    VideoFrame(VideoFrame),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cmd(_) => "cmd",
            Self::Data(_) => "data",
            Self::AudioFrame(_) => "audio_frame",
            Self::VideoFrame(_) => "video_frame",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Cmd(m) => &m.name,
            Self::Data(m) => &m.name,
            Self::AudioFrame(m) => &m.name,
            Self::VideoFrame(m) => &m.name,
        }
    }
}

impl From<Cmd> for Message {
    fn from(cmd: Cmd) -> Self {
        Self::Cmd(cmd)
    }
}

impl From<Data> for Message {
    fn from(data: Data) -> Self {
        Self::Data(data)
    }
}

impl From<AudioFrame> for Message {
    fn from(frame: AudioFrame) -> Self {
        Self::AudioFrame(frame)
    }
}

impl From<VideoFrame> for Message {
    fn from(frame: VideoFrame) -> Self {
        Self::VideoFrame(frame)
    }
}
