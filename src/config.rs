use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const DEFAULT_QUEUE_SIZE: usize = 20;
const USB_DEVICE: &str = "/dev/video0";
const MIPI_SENSOR: &str = "csi://0";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Rtsp,
    Mipi,
    Usb,
}

impl SourceType {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "rtsp" => Ok(SourceType::Rtsp),
            "mipi" => Ok(SourceType::Mipi),
            "usb" => Ok(SourceType::Usb),
            other => Err(anyhow!(
                "wrong source type '{}'; expected one of rtsp, mipi, usb",
                other
            )),
        }
    }
}

/// A named input stream. `name` is the config key (e.g. `stream_0`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSource {
    pub name: String,
    pub uri: String,
}

/// Validated run configuration handed to the pipeline process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub source_type: SourceType,
    pub sources: Vec<StreamSource>,
    pub display: bool,
    pub processing_width: u32,
    pub processing_height: u32,
    pub tiler_width: u32,
    pub tiler_height: u32,
    pub image_timer_secs: u64,
    pub queue_size: usize,
}

impl RunConfig {
    /// Parse and validate a `config.json` document.
    ///
    /// When `require_tiler` is false, missing tiler dimensions fall back to the
    /// processing dimensions.
    pub fn from_json_str(raw: &str, require_tiler: bool) -> Result<Self> {
        let doc: Value = serde_json::from_str(raw).map_err(|e| anyhow!("invalid json: {}", e))?;
        let Value::Object(map) = doc else {
            bail!("config must be a json object");
        };
        if map.is_empty() {
            bail!("no configuration provided in json file");
        }

        let source_type = SourceType::parse(
            required(&map, "source_type")?
                .as_str()
                .ok_or_else(|| anyhow!("wrong value for 'source_type'; expected a string"))?,
        )?;
        let sources = match source_type {
            SourceType::Rtsp => rtsp_sources(required(&map, "source")?)?,
            SourceType::Usb => vec![implicit_source(USB_DEVICE)],
            SourceType::Mipi => vec![implicit_source(MIPI_SENSOR)],
        };
        let display = required(&map, "display")?.as_bool().ok_or_else(|| {
            anyhow!(
                "wrong value for 'display'. Valid usage is 'display': true or 'display': false"
            )
        })?;
        let processing_width = positive_dimension(&map, "processing_width", 640)?;
        let processing_height = positive_dimension(&map, "processing_height", 480)?;
        let (tiler_width, tiler_height) = if require_tiler || map.contains_key("tiler_width") {
            (
                positive_dimension(&map, "tiler_width", 640)?,
                positive_dimension(&map, "tiler_height", 480)?,
            )
        } else {
            (processing_width, processing_height)
        };
        let image_timer_secs = positive_int(&map, "image_timer", 600)?;
        let queue_size = queue_size(required(&map, "queue_size")?)?;

        Ok(Self {
            source_type,
            sources,
            display,
            processing_width,
            processing_height,
            tiler_width,
            tiler_height,
            image_timer_secs,
            queue_size,
        })
    }

    pub fn number_sources(&self) -> usize {
        self.sources.len()
    }

    pub fn image_timer(&self) -> Duration {
        Duration::from_secs(self.image_timer_secs)
    }

    /// Serialize for the pipeline process command line.
    pub fn to_arg(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| anyhow!("serialize run config: {}", e))
    }

    /// Parse the pipeline process argument and re-check invariants.
    pub fn from_arg(arg: &str) -> Result<Self> {
        let cfg: RunConfig =
            serde_json::from_str(arg).map_err(|e| anyhow!("invalid run config argument: {}", e))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        match self.source_type {
            SourceType::Rtsp => {
                if self.sources.is_empty() {
                    bail!("rtsp requires at least one source");
                }
                if let Some(src) = self.sources.iter().find(|s| s.uri.trim().is_empty()) {
                    bail!("source '{}' has an empty uri", src.name);
                }
            }
            SourceType::Mipi | SourceType::Usb => {
                if self.sources.len() != 1 {
                    bail!("{:?} expects exactly one source", self.source_type);
                }
            }
        }
        for (name, value) in [
            ("processing_width", self.processing_width),
            ("processing_height", self.processing_height),
            ("tiler_width", self.tiler_width),
            ("tiler_height", self.tiler_height),
        ] {
            if value == 0 {
                bail!("'{}' must be greater than zero", name);
            }
        }
        if self.image_timer_secs == 0 {
            bail!("'image_timer' must be greater than zero");
        }
        if self.queue_size == 0 {
            bail!("'queue_size' must be greater than zero");
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(secs) = std::env::var("CAPTURE_IMAGE_TIMER_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                anyhow!("CAPTURE_IMAGE_TIMER_SECS must be an integer number of seconds")
            })?;
            if secs == 0 {
                bail!("CAPTURE_IMAGE_TIMER_SECS must be greater than zero");
            }
            self.image_timer_secs = secs;
        }
        if let Ok(size) = std::env::var("CAPTURE_QUEUE_SIZE") {
            let size: i64 = size
                .trim()
                .parse()
                .map_err(|_| anyhow!("CAPTURE_QUEUE_SIZE must be an integer"))?;
            self.queue_size = coerce_queue_size(size);
        }
        if let Ok(display) = std::env::var("CAPTURE_DISPLAY") {
            self.display = match display.trim() {
                "1" | "true" => true,
                "0" | "false" => false,
                other => bail!("CAPTURE_DISPLAY must be true or false, got '{}'", other),
            };
        }
        Ok(())
    }
}

/// Reads `config.json` on demand. The supervisor reloads it on every start signal.
#[derive(Clone, Debug)]
pub struct ConfigLoader {
    pub path: PathBuf,
    pub require_tiler: bool,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            require_tiler: true,
        }
    }

    /// Headless deployments may omit tiler dimensions.
    pub fn headless(mut self) -> Self {
        self.require_tiler = false;
        self
    }

    pub fn load(&self) -> Result<RunConfig> {
        let raw = read_config_file(&self.path)?;
        let mut cfg = RunConfig::from_json_str(&raw, self.require_tiler)
            .map_err(|e| anyhow!("invalid config file {}: {}", self.path.display(), e))?;
        cfg.apply_env()?;
        Ok(cfg)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_PATH)
    }
}

fn read_config_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))
}

fn required<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a Value> {
    map.get(key)
        .ok_or_else(|| anyhow!("missing key '{}' in config", key))
}

fn positive_int(map: &Map<String, Value>, key: &str, example: u64) -> Result<u64> {
    match required(map, key)?.as_i64() {
        Some(v) if v > 0 => Ok(v as u64),
        _ => Err(anyhow!(
            "wrong value for '{}'. Should be a positive integer, e.g. {}",
            key,
            example
        )),
    }
}

fn positive_dimension(map: &Map<String, Value>, key: &str, example: u64) -> Result<u32> {
    let value = positive_int(map, key, example)?;
    u32::try_from(value).map_err(|_| anyhow!("'{}' is out of range", key))
}

fn queue_size(value: &Value) -> Result<usize> {
    let size = value.as_i64().ok_or_else(|| {
        anyhow!("wrong value for 'queue_size'. Should be an integer greater than 0, e.g. 20")
    })?;
    Ok(coerce_queue_size(size))
}

fn coerce_queue_size(size: i64) -> usize {
    if size < 1 {
        log::warn!(
            "'queue_size' cannot be {}; switching to default value {}",
            size,
            DEFAULT_QUEUE_SIZE
        );
        return DEFAULT_QUEUE_SIZE;
    }
    usize::try_from(size).unwrap_or(DEFAULT_QUEUE_SIZE)
}

fn rtsp_sources(value: &Value) -> Result<Vec<StreamSource>> {
    let entries = value
        .as_object()
        .ok_or_else(|| anyhow!("'source' must be a mapping of stream name to uri"))?;
    if entries.is_empty() {
        bail!("no source provided in json file");
    }
    let mut sources = Vec::with_capacity(entries.len());
    for (name, uri) in entries {
        let uri = uri
            .as_str()
            .ok_or_else(|| anyhow!("source '{}' must be a string uri", name))?;
        if uri.trim().is_empty() {
            bail!("no source provided for '{}'", name);
        }
        sources.push(StreamSource {
            name: name.clone(),
            uri: uri.to_string(),
        });
    }
    sources.sort_by_key(|s| (stream_ordinal(&s.name), s.name.clone()));
    Ok(sources)
}

/// `stream_<n>` keys sort numerically; anything else sorts after them by name.
fn stream_ordinal(name: &str) -> usize {
    name.strip_prefix("stream_")
        .and_then(|n| n.parse().ok())
        .unwrap_or(usize::MAX)
}

fn implicit_source(uri: &str) -> StreamSource {
    StreamSource {
        name: "stream_0".to_string(),
        uri: uri.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Value {
        serde_json::json!({
            "source_type": "rtsp",
            "source": {"stream_0": "rtsp://cam-0/live", "stream_1": "rtsp://cam-1/live"},
            "display": false,
            "processing_width": 1280,
            "processing_height": 720,
            "tiler_width": 1280,
            "tiler_height": 720,
            "image_timer": 600,
            "queue_size": 20
        })
    }

    fn with(key: &str, value: Value) -> String {
        let mut doc = base();
        doc[key] = value;
        doc.to_string()
    }

    fn without(key: &str) -> String {
        let mut doc = base();
        doc.as_object_mut().unwrap().remove(key);
        doc.to_string()
    }

    #[test]
    fn accepts_valid_rtsp_config() {
        let cfg = RunConfig::from_json_str(&base().to_string(), true).unwrap();
        assert_eq!(cfg.source_type, SourceType::Rtsp);
        assert_eq!(cfg.number_sources(), 2);
        assert_eq!(cfg.sources[1].uri, "rtsp://cam-1/live");
        assert_eq!(cfg.image_timer(), Duration::from_secs(600));
        assert_eq!(cfg.queue_size, 20);
    }

    #[test]
    fn rejects_empty_source_mapping() {
        let err = RunConfig::from_json_str(&with("source", serde_json::json!({})), true)
            .unwrap_err();
        assert!(err.to_string().contains("no source"));
    }

    #[test]
    fn rejects_empty_uri() {
        let raw = with("source", serde_json::json!({"stream_0": ""}));
        assert!(RunConfig::from_json_str(&raw, true).is_err());
    }

    #[test]
    fn rejects_unknown_source_type() {
        let raw = with("source_type", serde_json::json!("hdmi"));
        let err = RunConfig::from_json_str(&raw, true).unwrap_err();
        assert!(err.to_string().contains("wrong source type"));
    }

    #[test]
    fn rejects_non_bool_display() {
        let raw = with("display", serde_json::json!("yes"));
        assert!(RunConfig::from_json_str(&raw, true).is_err());
    }

    #[test]
    fn rejects_non_integer_fields() {
        for key in ["processing_width", "processing_height", "image_timer", "queue_size"] {
            let raw = with(key, serde_json::json!(12.5));
            assert!(RunConfig::from_json_str(&raw, true).is_err(), "{}", key);
        }
        let raw = with("processing_width", serde_json::json!(true));
        assert!(RunConfig::from_json_str(&raw, true).is_err());
    }

    #[test]
    fn rejects_missing_key() {
        let err = RunConfig::from_json_str(&without("image_timer"), true).unwrap_err();
        assert!(err.to_string().contains("image_timer"));
    }

    #[test]
    fn rejects_empty_document_and_bad_json() {
        assert!(RunConfig::from_json_str("{}", true).is_err());
        assert!(RunConfig::from_json_str("{\"source_type\":", true).is_err());
        assert!(RunConfig::from_json_str("[]", true).is_err());
    }

    #[test]
    fn zero_queue_size_is_coerced_to_default() {
        let cfg = RunConfig::from_json_str(&with("queue_size", serde_json::json!(0)), true)
            .unwrap();
        assert_eq!(cfg.queue_size, DEFAULT_QUEUE_SIZE);
        let cfg = RunConfig::from_json_str(&with("queue_size", serde_json::json!(-4)), true)
            .unwrap();
        assert_eq!(cfg.queue_size, DEFAULT_QUEUE_SIZE);
    }

    #[test]
    fn tiler_is_optional_only_when_headless() {
        let mut doc = base();
        let map = doc.as_object_mut().unwrap();
        map.remove("tiler_width");
        map.remove("tiler_height");
        let raw = doc.to_string();

        assert!(RunConfig::from_json_str(&raw, true).is_err());
        let cfg = RunConfig::from_json_str(&raw, false).unwrap();
        assert_eq!((cfg.tiler_width, cfg.tiler_height), (1280, 720));
    }

    #[test]
    fn usb_and_mipi_have_one_implicit_source() {
        for (kind, uri) in [("usb", USB_DEVICE), ("mipi", MIPI_SENSOR)] {
            let raw = without("source");
            let mut doc: Value = serde_json::from_str(&raw).unwrap();
            doc["source_type"] = serde_json::json!(kind);
            let cfg = RunConfig::from_json_str(&doc.to_string(), true).unwrap();
            assert_eq!(cfg.number_sources(), 1);
            assert_eq!(cfg.sources[0].uri, uri);
            assert_eq!(cfg.sources[0].name, "stream_0");
        }
    }

    #[test]
    fn sources_are_ordered_by_stream_number() {
        let raw = with(
            "source",
            serde_json::json!({
                "stream_10": "rtsp://c10",
                "stream_2": "rtsp://c2",
                "stream_0": "rtsp://c0",
                "lobby": "rtsp://lobby"
            }),
        );
        let cfg = RunConfig::from_json_str(&raw, true).unwrap();
        let names: Vec<_> = cfg.sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["stream_0", "stream_2", "stream_10", "lobby"]);
    }

    #[test]
    fn run_config_round_trips_through_argument() {
        let cfg = RunConfig::from_json_str(&base().to_string(), true).unwrap();
        let arg = cfg.to_arg().unwrap();
        assert_eq!(RunConfig::from_arg(&arg).unwrap(), cfg);

        let mut broken = cfg.clone();
        broken.queue_size = 0;
        assert!(RunConfig::from_arg(&broken.to_arg().unwrap()).is_err());
    }
}
