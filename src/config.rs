// ====================================================================================
// src/config.rs - 配置管理
// ====================================================================================
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} must be a valid value, got {value:?}")]
    Invalid { name: &'static str, value: String },
}

// 回合超时后如何处理未作答的玩家
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutAnswerPolicy {
    /// 代替玩家选择第一个选项（是/否题为 "yes"）
    DefaultAnswer,
    /// 只用已提交的答案结算，缺席者视为不匹配
    Skip,
}

impl std::str::FromStr for TimeoutAnswerPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::DefaultAnswer),
            "skip" => Ok(Self::Skip),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub admin_api_key: String,
    pub max_connections: u32,

    // 房间默认设置
    pub max_players: usize,
    pub total_questions: usize,
    pub default_category: String,
    pub room_code_length: usize,

    // 回合计时
    pub round_timeout_seconds: u64,
    pub round_result_delay_seconds: u64,
    pub timeout_answer_policy: TimeoutAnswerPolicy,

    // 房间回收
    pub finished_room_ttl_seconds: u64,
    pub room_idle_timeout_seconds: u64,
    pub sweep_interval_seconds: u64,

    pub max_coin_transaction: i64,
    pub category_cache_ttl_seconds: u64,
    pub question_bank_path: Option<String>,
    pub max_message_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://match_room.db?mode=rwc".to_string(),
            bind_address: "0.0.0.0:3000".to_string(),
            admin_api_key: String::new(),
            max_connections: 10_000,
            max_players: 2,
            total_questions: 10,
            default_category: "just_friends".to_string(),
            room_code_length: 6,
            round_timeout_seconds: 30,
            round_result_delay_seconds: 3,
            timeout_answer_policy: TimeoutAnswerPolicy::DefaultAnswer,
            finished_room_ttl_seconds: 300,
            room_idle_timeout_seconds: 1800,
            sweep_interval_seconds: 60,
            max_coin_transaction: 100_000,
            category_cache_ttl_seconds: 300,
            question_bank_path: None,
            max_message_length: 500,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // 尝试加载 .env 文件，如果失败则忽略（可能文件不存在）
        if let Err(e) = dotenvy::dotenv() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }

        let defaults = Self::default();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            bind_address: std::env::var("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            admin_api_key: std::env::var("ADMIN_API_KEY")
                .map_err(|_| ConfigError::Missing("ADMIN_API_KEY"))?,
            max_connections: parse_env("MAX_CONNECTIONS", defaults.max_connections)?,

            max_players: parse_env("MAX_PLAYERS", defaults.max_players)?,
            total_questions: parse_env("TOTAL_QUESTIONS", defaults.total_questions)?,
            default_category: std::env::var("DEFAULT_CATEGORY").unwrap_or(defaults.default_category),
            room_code_length: parse_env("ROOM_CODE_LENGTH", defaults.room_code_length)?,

            round_timeout_seconds: parse_env("ROUND_TIMEOUT_SECONDS", defaults.round_timeout_seconds)?,
            round_result_delay_seconds: parse_env(
                "ROUND_RESULT_DELAY_SECONDS",
                defaults.round_result_delay_seconds,
            )?,
            timeout_answer_policy: parse_env("TIMEOUT_ANSWER_POLICY", defaults.timeout_answer_policy)?,

            finished_room_ttl_seconds: parse_env(
                "FINISHED_ROOM_TTL_SECONDS",
                defaults.finished_room_ttl_seconds,
            )?,
            room_idle_timeout_seconds: parse_env(
                "ROOM_IDLE_TIMEOUT_SECONDS",
                defaults.room_idle_timeout_seconds,
            )?,
            sweep_interval_seconds: parse_env("SWEEP_INTERVAL_SECONDS", defaults.sweep_interval_seconds)?,

            max_coin_transaction: parse_env("MAX_COIN_TRANSACTION", defaults.max_coin_transaction)?,
            category_cache_ttl_seconds: parse_env(
                "CATEGORY_CACHE_TTL_SECONDS",
                defaults.category_cache_ttl_seconds,
            )?,
            question_bank_path: std::env::var("QUESTION_BANK_PATH").ok(),
            max_message_length: parse_env("MAX_MESSAGE_LENGTH", defaults.max_message_length)?,
        })
    }

    pub fn game_timings(&self) -> GameTimings {
        GameTimings {
            round_timeout: (self.round_timeout_seconds > 0)
                .then(|| Duration::from_secs(self.round_timeout_seconds)),
            result_delay: Duration::from_secs(self.round_result_delay_seconds),
            finished_ttl: Duration::from_secs(self.finished_room_ttl_seconds),
            timeout_policy: self.timeout_answer_policy,
        }
    }
}

// 房间 actor 使用的计时参数
#[derive(Clone, Copy, Debug)]
pub struct GameTimings {
    /// None 表示不在服务端强制回合超时
    pub round_timeout: Option<Duration>,
    pub result_delay: Duration,
    pub finished_ttl: Duration,
    pub timeout_policy: TimeoutAnswerPolicy,
}

fn parse_env<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_policy_parses_case_insensitively() {
        assert_eq!("Default".parse(), Ok(TimeoutAnswerPolicy::DefaultAnswer));
        assert_eq!(" skip ".parse(), Ok(TimeoutAnswerPolicy::Skip));
        assert!("later".parse::<TimeoutAnswerPolicy>().is_err());
    }

    #[test]
    fn zero_round_timeout_disables_server_deadline() {
        let config = Config {
            round_timeout_seconds: 0,
            ..Config::default()
        };
        assert!(config.game_timings().round_timeout.is_none());
        assert_eq!(
            Config::default().game_timings().round_timeout,
            Some(Duration::from_secs(30))
        );
    }
}
