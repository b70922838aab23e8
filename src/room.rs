// ====================================================================================
// src/room.rs - 房间成员管理与输入校验
// ====================================================================================
use crate::{
    error::AppError,
    models::{Player, Room, RoomSettings, RoomStatus},
};
use chrono::Utc;
use rand::Rng;

/// 房间码字符集：大写字母与数字，去掉易混淆的 I、O、0、1
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const MAX_NAME_CHARS: usize = 20;
const MAX_AVATAR_CHARS: usize = 64;
const MAX_CATEGORY_CHARS: usize = 40;
const MAX_ANSWER_CHARS: usize = 200;

impl Room {
    pub fn new(room_code: String, mut creator: Player, settings: RoomSettings) -> Self {
        creator.is_host = true;
        Self {
            room_code,
            created_at: Utc::now(),
            status: RoomStatus::Waiting,
            players: vec![creator],
            current_question_index: 0,
            questions: Vec::new(),
            settings,
        }
    }

    pub fn player(&self, player_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == player_id)
    }

    pub fn player_mut(&mut self, player_id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == player_id)
    }

    pub fn has_player(&self, player_id: &str) -> bool {
        self.player(player_id).is_some()
    }

    pub fn host_id(&self) -> Option<&str> {
        self.players.iter().find(|p| p.is_host).map(|p| p.id.as_str())
    }

    pub fn ensure_host(&self, player_id: &str) -> Result<(), AppError> {
        if self.host_id() == Some(player_id) {
            Ok(())
        } else {
            Err(AppError::NotHost)
        }
    }

    pub fn add_player(&mut self, mut player: Player) -> Result<(), AppError> {
        if self.status != RoomStatus::Waiting {
            return Err(AppError::invalid_state("Game already started"));
        }
        if self.players.len() >= self.settings.max_players {
            return Err(AppError::RoomFull);
        }
        if self.has_player(&player.id) {
            return Err(AppError::invalid_state("Already in this room"));
        }
        player.is_host = self.players.is_empty();
        self.players.push(player);
        Ok(())
    }

    // 移除玩家；房主离开时由最早加入的剩余玩家接任
    pub fn remove_player(&mut self, player_id: &str) -> Option<Player> {
        let index = self.players.iter().position(|p| p.id == player_id)?;
        let removed = self.players.remove(index);
        if removed.is_host {
            if let Some(next) = self.players.first_mut() {
                next.is_host = true;
            }
        }
        Some(removed)
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn current_question(&self) -> Option<&crate::models::Question> {
        self.questions.get(self.current_question_index)
    }
}

pub fn generate_room_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

pub fn normalize_room_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

pub fn is_valid_room_code(code: &str, length: usize) -> bool {
    code.len() == length && code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b))
}

fn validate_text(raw: &str, field: &str, max_chars: usize) -> Result<String, AppError> {
    let value = raw.trim();
    let chars = value.chars().count();
    if chars == 0 {
        return Err(AppError::validation(format!("{} is required", field)));
    }
    if chars > max_chars {
        return Err(AppError::validation(format!(
            "{} must be at most {} characters",
            field, max_chars
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(AppError::validation(format!("{} contains invalid characters", field)));
    }
    Ok(value.to_string())
}

pub fn validate_player_name(raw: &str) -> Result<String, AppError> {
    validate_text(raw, "Player name", MAX_NAME_CHARS)
}

pub fn validate_avatar(raw: &str) -> Result<String, AppError> {
    validate_text(raw, "Avatar", MAX_AVATAR_CHARS)
}

pub fn validate_answer(raw: &str) -> Result<String, AppError> {
    validate_text(raw, "Answer", MAX_ANSWER_CHARS)
}

pub fn validate_message(raw: &str, max_chars: usize) -> Result<String, AppError> {
    validate_text(raw, "Message", max_chars)
}

pub fn validate_category(raw: &str) -> Result<String, AppError> {
    let value = raw.trim();
    let well_formed = !value.is_empty()
        && value.len() <= MAX_CATEGORY_CHARS
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if well_formed {
        Ok(value.to_string())
    } else {
        Err(AppError::validation(format!("Invalid category: {}", raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(max_players: usize) -> RoomSettings {
        RoomSettings {
            max_players,
            total_questions: 3,
            category: "just_friends".into(),
        }
    }

    fn player(id: &str) -> Player {
        Player::new(id, id.to_uppercase(), "cat".into())
    }

    fn host_count(room: &Room) -> usize {
        room.players.iter().filter(|p| p.is_host).count()
    }

    #[test]
    fn creator_is_sole_host() {
        let room = Room::new("ABC234".into(), player("alice"), settings(2));
        assert_eq!(room.status, RoomStatus::Waiting);
        assert_eq!(room.host_id(), Some("alice"));
        assert_eq!(host_count(&room), 1);
    }

    #[test]
    fn join_full_room_fails() {
        let mut room = Room::new("ABC234".into(), player("alice"), settings(2));
        room.add_player(player("bob")).unwrap();
        assert!(matches!(room.add_player(player("carol")), Err(AppError::RoomFull)));
        assert_eq!(room.players.len(), 2);
        assert!(!room.players[1].is_host);
    }

    #[test]
    fn join_started_room_fails() {
        let mut room = Room::new("ABC234".into(), player("alice"), settings(4));
        room.status = RoomStatus::Playing;
        assert!(matches!(room.add_player(player("bob")), Err(AppError::InvalidState(_))));
    }

    #[test]
    fn host_migrates_to_oldest_remaining_player() {
        let mut room = Room::new("ABC234".into(), player("alice"), settings(4));
        room.add_player(player("bob")).unwrap();
        room.add_player(player("carol")).unwrap();

        room.remove_player("alice");
        assert_eq!(room.host_id(), Some("bob"));
        assert_eq!(host_count(&room), 1);

        room.remove_player("carol");
        assert_eq!(room.host_id(), Some("bob"));
        assert_eq!(host_count(&room), 1);

        room.remove_player("bob");
        assert!(room.is_empty());
    }

    #[test]
    fn removing_unknown_player_is_none() {
        let mut room = Room::new("ABC234".into(), player("alice"), settings(2));
        assert!(room.remove_player("ghost").is_none());
        assert_eq!(room.players.len(), 1);
    }

    #[test]
    fn room_code_format() {
        for _ in 0..100 {
            let code = generate_room_code(6);
            assert!(is_valid_room_code(&code, 6), "Invalid room code: {code}");
        }
        assert!(!is_valid_room_code("abc234", 6));
        assert!(!is_valid_room_code("ABC23", 6));
        assert_eq!(normalize_room_code(" abc234 "), "ABC234");
    }

    #[test]
    fn name_and_avatar_validation() {
        assert_eq!(validate_player_name("  Ada ").unwrap(), "Ada");
        assert!(validate_player_name("   ").is_err());
        assert!(validate_player_name(&"x".repeat(21)).is_err());
        assert!(validate_player_name("bad\u{7}name").is_err());
        assert!(validate_avatar("🐱").is_ok());
        assert!(validate_avatar("").is_err());
    }

    #[test]
    fn category_charset() {
        assert_eq!(validate_category("just_friends").unwrap(), "just_friends");
        assert!(validate_category("Just Friends").is_err());
        assert!(validate_category("").is_err());
    }

    #[test]
    fn message_length_limit() {
        assert!(validate_message(&"a".repeat(500), 500).is_ok());
        assert!(validate_message(&"a".repeat(501), 500).is_err());
    }
}
