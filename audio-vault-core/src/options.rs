use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_BITRATE_KBPS: u32 = 320;
pub const DEFAULT_CHANNELS: u8 = 2;
pub const DEFAULT_CODEC: &str = "pcm_s16le";

/// Channel layout label → physical channel count.
const CHANNEL_TABLE: &[(&str, u8)] = &[
    ("2.0", 2),
    ("2", 2),
    ("4.0", 4),
    ("4", 4),
    ("7.0", 7),
    ("7", 7),
    ("7.1", 8),
    ("8", 8),
];

/// Sample bit depth → PCM codec identifier.
const CODEC_TABLE: &[(&str, &str)] = &[
    ("8", "pcm_u8"),
    ("16", "pcm_s16le"),
    ("24", "pcm_s24le"),
    ("32", "pcm_s32le"),
];

/// Options as submitted by the client.
///
/// The submitted JSON object is kept as-is so the catalog stores exactly what
/// was sent; typed views are read from it on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversionOptions(Map<String, Value>);

/// Tool parameters derived from [`ConversionOptions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionParams {
    pub channels: u8,
    pub codec: &'static str,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
}

impl ConversionOptions {
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// The submitted object, unchanged.
    pub fn raw(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn channels(&self) -> Option<String> {
        self.text("channels")
    }

    pub fn bitrate(&self) -> Option<String> {
        self.text("bitrate")
    }

    pub fn bit_depth(&self) -> Option<String> {
        self.text("bit_depth")
    }

    /// Strings as sent, numbers in their submitted notation (`2.0` stays `2.0`).
    fn text(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn extraction_params(&self) -> ExtractionParams {
        let channels =
            lookup(CHANNEL_TABLE, self.channels().as_deref()).unwrap_or(DEFAULT_CHANNELS);
        let codec = lookup(CODEC_TABLE, self.bit_depth().as_deref()).unwrap_or(DEFAULT_CODEC);
        let bitrate_kbps = self
            .bitrate()
            .as_deref()
            .map(|b| b.trim().trim_end_matches(['k', 'K']))
            .and_then(|b| b.parse::<u32>().ok())
            .filter(|b| *b > 0)
            .unwrap_or(DEFAULT_BITRATE_KBPS);

        ExtractionParams {
            channels,
            codec,
            bitrate_kbps,
            sample_rate: SAMPLE_RATE,
        }
    }
}

fn lookup<T: Copy>(table: &[(&str, T)], key: Option<&str>) -> Option<T> {
    let key = key?.trim();
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}
