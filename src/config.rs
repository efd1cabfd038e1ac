//! Application-level configuration loading, including the game timing constants.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZROOM_BACK_CONFIG_PATH";
/// Default location of the quiz catalogue consumed by the question bank.
const DEFAULT_QUIZ_CATALOG_PATH: &str = "config/quizzes.json";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    game: GameSettings,
    quiz_catalog: PathBuf,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to the baked-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        catalog = %app_config.quiz_catalog.display(),
                        "loaded game settings from config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Timing and scoring constants applied to every room.
    pub fn game(&self) -> &GameSettings {
        &self.game
    }

    /// Location of the JSON quiz catalogue.
    pub fn quiz_catalog(&self) -> &PathBuf {
        &self.quiz_catalog
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            game: GameSettings::default(),
            quiz_catalog: PathBuf::from(DEFAULT_QUIZ_CATALOG_PATH),
        }
    }
}

/// Tuning constants of the room orchestration core.
///
/// Every field can be overridden from the `game` object of the configuration file; missing
/// fields keep their default value.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameSettings {
    /// Reserved username identifying the host of a room.
    pub host_username: String,
    /// Prefix of solo practice room identifiers.
    pub test_room_prefix: String,
    /// Multiplier applied to the points of the fastest correct respondent.
    pub bonus_multiplier: f64,
    /// Two correct answers validated closer than this window void the bonus.
    pub bonus_window_ms: u64,
    /// Delay between a transport disconnect and the actual removal of the user.
    pub grace_period_ms: u64,
    /// Countdown displayed between the host confirmation and the first question.
    pub starting_countdown_s: u32,
    /// Delay before auto-advancing when the host is also a player.
    pub confirm_delay_s: u32,
    /// Answer time of open-ended questions.
    pub qrl_duration_s: u32,
    /// Minimum remaining seconds to enable panic mode on a multiple-choice question.
    pub qcm_panic_floor_s: u32,
    /// Minimum remaining seconds to enable panic mode on an open-ended question.
    pub qrl_panic_floor_s: u32,
    /// Period of a countdown tick once panic mode is enabled.
    pub panic_tick_ms: u64,
    /// Period of a regular countdown tick.
    pub tick_ms: u64,
    /// Number of questions drawn for a random game.
    pub random_question_count: usize,
    /// Minimum amount of multiple-choice questions required to build a random game.
    pub random_min_questions: usize,
    /// Answer time of each random game question.
    pub random_duration_s: u32,
    /// Title announced when a random game starts.
    pub random_title: String,
    /// Lowest room code handed out.
    pub room_code_min: u32,
    /// Highest room code handed out.
    pub room_code_max: u32,
    /// A QRL answer edited within this window counts as active in the live histogram.
    pub qrl_activity_window_ms: u64,
}

impl GameSettings {
    /// Grace period as a [`Duration`].
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Regular tick period as a [`Duration`].
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Panic tick period as a [`Duration`].
    pub fn panic_tick(&self) -> Duration {
        Duration::from_millis(self.panic_tick_ms)
    }
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            host_username: "Organisateur".into(),
            test_room_prefix: "test-".into(),
            bonus_multiplier: 1.2,
            bonus_window_ms: 1_000,
            grace_period_ms: 5_000,
            starting_countdown_s: 5,
            confirm_delay_s: 3,
            qrl_duration_s: 60,
            qcm_panic_floor_s: 10,
            qrl_panic_floor_s: 20,
            panic_tick_ms: 250,
            tick_ms: 1_000,
            random_question_count: 5,
            random_min_questions: 5,
            random_duration_s: 20,
            random_title: "Mode aléatoire".into(),
            room_code_min: 1_000,
            room_code_max: 9_999,
            qrl_activity_window_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(default)]
    game: GameSettings,
    #[serde(default)]
    quiz_catalog: Option<PathBuf>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            game: value.game,
            quiz_catalog: value
                .quiz_catalog
                .unwrap_or_else(|| PathBuf::from(DEFAULT_QUIZ_CATALOG_PATH)),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_game_section_keeps_defaults() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"game": {"bonus_window_ms": 250}}"#).unwrap();
        let config: AppConfig = raw.into();

        assert_eq!(config.game().bonus_window_ms, 250);
        assert_eq!(config.game().host_username, "Organisateur");
        assert_eq!(config.quiz_catalog(), &PathBuf::from(DEFAULT_QUIZ_CATALOG_PATH));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let raw: RawConfig = serde_json::from_str("{}").unwrap();
        let config: AppConfig = raw.into();
        assert_eq!(config.game().random_question_count, 5);
        assert_eq!(config.game().grace_period(), Duration::from_secs(5));
    }
}
