use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StripConfig {
    #[serde(rename = "pixelCount")]
    pub pixel_count: usize,
    #[serde(rename = "dataPin")]
    pub data_pin: u32,
    /// Strip wired with pixel 0 at the far end.
    pub reversed: bool,
    /// Physical index of logical slot 0 (rotated wiring).
    pub offset: usize,
    pub brightness: u8,
}

impl Default for StripConfig {
    fn default() -> Self {
        Self {
            pixel_count: 12,
            data_pin: 18,
            reversed: false,
            offset: 0,
            brightness: 128,
        }
    }
}

impl StripConfig {
    pub fn sanitize(&mut self) {
        if self.pixel_count == 0 {
            self.pixel_count = 1;
        }
        self.offset %= self.pixel_count;
        if self.brightness < 8 {
            self.brightness = 8;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    #[serde(rename = "intervalMinutes")]
    pub interval_minutes: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 30,
        }
    }
}

impl SyncConfig {
    pub fn sanitize(&mut self) {
        self.interval_minutes = self.interval_minutes.clamp(1, 720);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(rename = "wifiSsid")]
    pub wifi_ssid: String,
    #[serde(rename = "wifiPass")]
    pub wifi_pass: String,
    #[serde(rename = "backendUrl")]
    pub backend_url: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            backend_url: "http://192.168.1.100:5000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub strip: StripConfig,
    pub sync: SyncConfig,
    pub timezone: String,
    pub network: NetworkConfig,
    /// Task roster in slot order; one strip pixel per entry.
    #[serde(default)]
    pub tasks: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            strip: StripConfig::default(),
            sync: SyncConfig::default(),
            timezone: "America/Los_Angeles".to_string(),
            network: NetworkConfig::default(),
            tasks: vec![
                "meditate".to_string(),
                "exercise".to_string(),
                "read".to_string(),
                "journal".to_string(),
            ],
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.strip.sanitize();
        self.sync.sanitize();
        // One slot per pixel; surplus roster entries can never render.
        if self.tasks.len() > self.strip.pixel_count {
            self.tasks.truncate(self.strip.pixel_count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_clamps_strip_fields() {
        let mut config = StripConfig {
            pixel_count: 0,
            data_pin: 18,
            reversed: false,
            offset: 7,
            brightness: 0,
        };
        config.sanitize();

        assert_eq!(config.pixel_count, 1);
        assert_eq!(config.offset, 0);
        assert_eq!(config.brightness, 8);
    }

    #[test]
    fn sanitize_truncates_roster_to_pixel_count() {
        let mut runtime = RuntimeConfig::default();
        runtime.strip.pixel_count = 2;
        runtime.tasks = vec!["a".into(), "b".into(), "c".into()];
        runtime.sanitize();

        assert_eq!(runtime.tasks, vec!["a".to_string(), "b".to_string()]);
    }
}
