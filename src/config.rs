use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IdCaptureConfig {
    pub camera: CameraConfig,
    pub quality: QualityConfig,
    pub readiness: ReadinessConfig,
    pub face: FaceConfig,
    pub countdown: CountdownConfig,
    pub encoding: EncodingConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraConfig {
    /// Target resolution (width, height) requested from the device
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Frame tick rate of the sampling loop
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// Facing mode used when the capture surface opens
    #[serde(default = "default_facing")]
    pub facing: FacingMode,

    /// V4L2 device index for the user-facing camera
    #[serde(default = "default_user_device")]
    pub user_device: u32,

    /// V4L2 device index for the environment-facing camera
    #[serde(default = "default_environment_device")]
    pub environment_device: u32,
}

/// Thresholds for the coarse document gates computed per frame
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct QualityConfig {
    #[serde(default = "default_document_brightness_min")]
    pub document_brightness_min: f64,

    #[serde(default = "default_document_brightness_max")]
    pub document_brightness_max: f64,

    #[serde(default = "default_document_sharpness_min")]
    pub document_sharpness_min: f64,

    /// Minimum center-vs-corner intensity difference for alignment
    #[serde(default = "default_alignment_contrast_min")]
    pub alignment_contrast_min: f64,

    /// Position of the corner sample as a fraction of width/height
    #[serde(default = "default_corner_sample_fraction")]
    pub corner_sample_fraction: f64,
}

/// Stricter thresholds gating an automatic capture
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ReadinessConfig {
    #[serde(default = "default_capture_brightness_min")]
    pub brightness_min: f64,

    #[serde(default = "default_capture_brightness_max")]
    pub brightness_max: f64,

    #[serde(default = "default_capture_sharpness_min")]
    pub sharpness_min: f64,

    /// What readiness does while the face capability is not loaded
    #[serde(default)]
    pub face_fallback: FaceFallback,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FaceConfig {
    /// Minimum detector score for a detection to count as a face
    #[serde(default = "default_face_min_confidence")]
    pub min_confidence: f64,

    /// Face box area as a fraction of frame area, lower bound
    #[serde(default = "default_face_min_area_fraction")]
    pub min_area_fraction: f64,

    /// Face box area as a fraction of frame area, upper bound
    #[serde(default = "default_face_max_area_fraction")]
    pub max_area_fraction: f64,

    /// Max distance of the face center from the frame center, as a fraction of frame size
    #[serde(default = "default_face_center_tolerance")]
    pub center_tolerance: f64,

    /// Give up loading the face capability after this many milliseconds
    #[serde(default = "default_face_load_timeout_ms")]
    pub load_timeout_ms: u64,

    /// Treat a single detection call as "no face" after this many milliseconds
    #[serde(default = "default_face_detect_timeout_ms")]
    pub detect_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CountdownConfig {
    /// First countdown value shown once readiness is reached
    #[serde(default = "default_countdown_start")]
    pub start: u8,

    /// Duration of one countdown step in milliseconds
    #[serde(default = "default_countdown_step_ms")]
    pub step_ms: u64,

    /// Whether auto-capture is enabled when the surface opens
    #[serde(default = "default_auto_capture")]
    pub auto_capture: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EncodingConfig {
    /// JPEG quality (1-100) of the emitted still image
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Command channel capacity of a capture handle
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

/// Which physical camera is active
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    User,
    Environment,
}

impl FacingMode {
    /// The opposite camera
    pub fn flipped(self) -> Self {
        match self {
            FacingMode::User => FacingMode::Environment,
            FacingMode::Environment => FacingMode::User,
        }
    }
}

impl fmt::Display for FacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FacingMode::User => write!(f, "user"),
            FacingMode::Environment => write!(f, "environment"),
        }
    }
}

/// Readiness behaviour while no face result is available
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FaceFallback {
    /// No face capability means no auto-capture
    #[default]
    RequireFace,
    /// Gate on document quality alone until the capability is ready
    DocumentOnly,
}

impl IdCaptureConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("idcapture.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("camera.facing", default_facing().to_string())?
            .set_default("camera.user_device", default_user_device())?
            .set_default("camera.environment_device", default_environment_device())?
            .set_default(
                "quality.document_brightness_min",
                default_document_brightness_min(),
            )?
            .set_default(
                "quality.document_brightness_max",
                default_document_brightness_max(),
            )?
            .set_default(
                "quality.document_sharpness_min",
                default_document_sharpness_min(),
            )?
            .set_default(
                "quality.alignment_contrast_min",
                default_alignment_contrast_min(),
            )?
            .set_default(
                "quality.corner_sample_fraction",
                default_corner_sample_fraction(),
            )?
            .set_default("readiness.brightness_min", default_capture_brightness_min())?
            .set_default("readiness.brightness_max", default_capture_brightness_max())?
            .set_default("readiness.sharpness_min", default_capture_sharpness_min())?
            .set_default("readiness.face_fallback", "require_face")?
            .set_default("face.min_confidence", default_face_min_confidence())?
            .set_default("face.min_area_fraction", default_face_min_area_fraction())?
            .set_default("face.max_area_fraction", default_face_max_area_fraction())?
            .set_default("face.center_tolerance", default_face_center_tolerance())?
            .set_default("face.load_timeout_ms", default_face_load_timeout_ms())?
            .set_default("face.detect_timeout_ms", default_face_detect_timeout_ms())?
            .set_default("countdown.start", default_countdown_start() as u64)?
            .set_default("countdown.step_ms", default_countdown_step_ms())?
            .set_default("countdown.auto_capture", default_auto_capture())?
            .set_default("encoding.jpeg_quality", default_jpeg_quality() as u64)?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default("system.command_capacity", default_command_capacity() as i64)?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with IDCAPTURE_ prefix
            .add_source(Environment::with_prefix("IDCAPTURE").separator("__"))
            .build()?;

        let config: IdCaptureConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if self.quality.document_brightness_min >= self.quality.document_brightness_max {
            return Err(ConfigError::Message(
                "Document brightness window is empty".to_string(),
            ));
        }

        if !(0.0..0.5).contains(&self.quality.corner_sample_fraction) {
            return Err(ConfigError::Message(
                "Corner sample fraction must be in [0, 0.5)".to_string(),
            ));
        }

        if self.readiness.brightness_min >= self.readiness.brightness_max {
            return Err(ConfigError::Message(
                "Capture brightness window is empty".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.face.min_confidence) {
            return Err(ConfigError::Message(
                "Face min_confidence must be between 0 and 1".to_string(),
            ));
        }

        if self.face.detect_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Face detect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.face.min_area_fraction >= self.face.max_area_fraction {
            return Err(ConfigError::Message(
                "Face area bounds are inverted".to_string(),
            ));
        }

        if self.countdown.start == 0 {
            return Err(ConfigError::Message(
                "Countdown start must be greater than 0".to_string(),
            ));
        }

        if self.countdown.step_ms == 0 {
            return Err(ConfigError::Message(
                "Countdown step_ms must be greater than 0".to_string(),
            ));
        }

        if self.encoding.jpeg_quality == 0 || self.encoding.jpeg_quality > 100 {
            return Err(ConfigError::Message(
                "JPEG quality must be between 1 and 100".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 || self.system.command_capacity == 0 {
            return Err(ConfigError::Message(
                "Channel capacities must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> crate::error::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl Default for IdCaptureConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                resolution: default_camera_resolution(),
                fps: default_camera_fps(),
                facing: default_facing(),
                user_device: default_user_device(),
                environment_device: default_environment_device(),
            },
            quality: QualityConfig::default(),
            readiness: ReadinessConfig::default(),
            face: FaceConfig::default(),
            countdown: CountdownConfig {
                start: default_countdown_start(),
                step_ms: default_countdown_step_ms(),
                auto_capture: default_auto_capture(),
            },
            encoding: EncodingConfig {
                jpeg_quality: default_jpeg_quality(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
                command_capacity: default_command_capacity(),
            },
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            document_brightness_min: default_document_brightness_min(),
            document_brightness_max: default_document_brightness_max(),
            document_sharpness_min: default_document_sharpness_min(),
            alignment_contrast_min: default_alignment_contrast_min(),
            corner_sample_fraction: default_corner_sample_fraction(),
        }
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            brightness_min: default_capture_brightness_min(),
            brightness_max: default_capture_brightness_max(),
            sharpness_min: default_capture_sharpness_min(),
            face_fallback: FaceFallback::default(),
        }
    }
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_face_min_confidence(),
            min_area_fraction: default_face_min_area_fraction(),
            max_area_fraction: default_face_max_area_fraction(),
            center_tolerance: default_face_center_tolerance(),
            load_timeout_ms: default_face_load_timeout_ms(),
            detect_timeout_ms: default_face_detect_timeout_ms(),
        }
    }
}

// Default value functions
fn default_camera_resolution() -> (u32, u32) {
    (1280, 720)
}
fn default_camera_fps() -> u32 {
    30
}
fn default_facing() -> FacingMode {
    FacingMode::Environment
}
fn default_user_device() -> u32 {
    0
}
fn default_environment_device() -> u32 {
    1
}

fn default_document_brightness_min() -> f64 {
    80.0
}
fn default_document_brightness_max() -> f64 {
    200.0
}
fn default_document_sharpness_min() -> f64 {
    5.0
}
fn default_alignment_contrast_min() -> f64 {
    30.0
}
fn default_corner_sample_fraction() -> f64 {
    0.1
}

fn default_capture_brightness_min() -> f64 {
    100.0
}
fn default_capture_brightness_max() -> f64 {
    180.0
}
fn default_capture_sharpness_min() -> f64 {
    10.0
}

fn default_face_min_confidence() -> f64 {
    0.5
}
fn default_face_min_area_fraction() -> f64 {
    0.02
}
fn default_face_max_area_fraction() -> f64 {
    0.6
}
fn default_face_center_tolerance() -> f64 {
    0.35
}
fn default_face_load_timeout_ms() -> u64 {
    10_000
}
fn default_face_detect_timeout_ms() -> u64 {
    1_000
}

fn default_countdown_start() -> u8 {
    3
}
fn default_countdown_step_ms() -> u64 {
    1000
}
fn default_auto_capture() -> bool {
    true
}

fn default_jpeg_quality() -> u8 {
    92
}

fn default_event_bus_capacity() -> usize {
    256
}
fn default_command_capacity() -> usize {
    16
}
