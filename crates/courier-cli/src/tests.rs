use std::path::PathBuf;

use chrono::{Duration, TimeZone, Utc};
use clap::Parser;
use courier_core::models::{
    Chat, ChatId, ChatMetadata, DeliveryStatus, Message, ParticipantId, SettingKey, SettingRow,
    SyncStatus,
};
use courier_core::sync::SettingSyncOutcome;
use pretty_assertions::assert_eq;

use crate::cli::{Cli, Commands, CompletionShell, SettingsCommands};
use crate::commands::common::{
    default_config_path, format_chat_lines, format_delivery_status, format_message_lines,
    format_outcome, format_relative_time, format_setting_lines, normalize_text, parse_id,
    parse_setting_key, preview, resolve_db_path, CliContext,
};
use crate::commands::completions::render_completions;
use crate::error::CliError;

fn at(hour: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
}

#[test]
fn format_relative_time_buckets() {
    let now = at(12);
    assert_eq!(format_relative_time(now, now), "just now");
    assert_eq!(format_relative_time(now - Duration::minutes(5), now), "5m ago");
    assert_eq!(format_relative_time(now - Duration::hours(3), now), "3h ago");
    assert_eq!(format_relative_time(now - Duration::days(2), now), "2d ago");
    assert_eq!(format_relative_time(now + Duration::minutes(5), now), "just now");
}

#[test]
fn preview_collapses_whitespace_and_truncates() {
    assert_eq!(preview("  hello   world \nsecond line", 40), "hello world");
    assert_eq!(preview("abcdefghij", 8), "abcde...");
}

#[test]
fn normalize_text_rejects_blank_input() {
    assert_eq!(
        normalize_text(&["  hi".to_string(), "there ".to_string()]).unwrap(),
        "hi there"
    );
    assert!(matches!(
        normalize_text(&[" ".to_string()]),
        Err(CliError::EmptyText)
    ));
}

#[test]
fn parse_id_reports_kind() {
    let id = ChatId::new();
    assert_eq!(parse_id::<ChatId>("chat", &format!(" {id} ")).unwrap(), id);

    let error = parse_id::<ChatId>("chat", "nope").unwrap_err();
    assert_eq!(error.to_string(), "Invalid chat ID 'nope'");
}

#[test]
fn parse_setting_key_accepts_wire_names() {
    assert_eq!(parse_setting_key("ui_language").unwrap(), SettingKey::UiLanguage);
    assert!(matches!(
        parse_setting_key("theme"),
        Err(CliError::UnknownSettingKey(key)) if key == "theme"
    ));
}

#[test]
fn resolve_db_path_prefers_flag_then_config() {
    let flag = PathBuf::from("/tmp/flag.db");
    let configured = PathBuf::from("/tmp/configured.db");
    assert_eq!(
        resolve_db_path(Some(flag.clone()), Some(configured.clone())),
        flag
    );
    assert_eq!(resolve_db_path(None, Some(configured.clone())), configured);
    assert!(resolve_db_path(None, None).ends_with("courier/courier.db"));
}

#[test]
fn default_config_path_lives_under_courier() {
    assert!(default_config_path().ends_with("courier/config.json"));
}

#[test]
fn context_load_applies_user_flag_over_file() {
    let dir = std::env::temp_dir().join(format!("courier-cli-test-{}", ChatId::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let config_path = dir.join("config.json");
    std::fs::write(
        &config_path,
        r#"{"api_base_url": "https://chat.example.com/", "user_id": "from-file"}"#,
    )
    .unwrap();

    let context = CliContext::load(
        Some(config_path),
        Some(dir.join("replica.db")),
        Some(" from-flag ".to_string()),
    )
    .unwrap();

    assert_eq!(context.settings.user_id.as_deref(), Some("from-flag"));
    assert_eq!(context.db_path, dir.join("replica.db"));
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn context_load_rejects_invalid_config() {
    let dir = std::env::temp_dir().join(format!("courier-cli-test-{}", ChatId::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let config_path = dir.join("config.json");
    std::fs::write(&config_path, r#"{"poll_interval_ms": 0}"#).unwrap();

    let result = CliContext::load(Some(config_path), Some(dir.join("replica.db")), None);

    assert!(matches!(result, Err(CliError::Core(_))));
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn format_chat_lines_shows_unread_count() {
    let mut metadata = ChatMetadata::named("Team");
    metadata.unread_messages_count = 3;
    let chat = Chat {
        id: ChatId::new(),
        metadata,
        updated_at: at(10),
    };

    let lines = format_chat_lines(&[chat], at(12));

    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("Team"));
    assert!(lines[0].contains("2h ago"));
    assert!(lines[0].ends_with("3 unread"));
}

#[test]
fn format_message_lines_marks_edits_and_status() {
    let mut message = Message::new(ChatId::new(), ParticipantId::new(), "hello", at(9));
    message.edited_at = Some(at(10));
    message.delivery_status = Some(DeliveryStatus::Sending { progress: 40 });

    let lines = format_message_lines(&[message]);

    assert!(lines[0].starts_with("2024-05-01 09:00"));
    assert!(lines[0].ends_with("hello  (edited)  [sending 40%]"));
}

#[test]
fn format_delivery_status_includes_details() {
    assert_eq!(format_delivery_status(&DeliveryStatus::Read), "read");
    assert_eq!(
        format_delivery_status(&DeliveryStatus::Failed {
            reason: "offline".to_string()
        }),
        "failed: offline"
    );
}

#[test]
fn format_setting_lines_shows_versions() {
    let row = SettingRow {
        user_id: "u1".to_string(),
        key: SettingKey::UiLanguage,
        value: "de".to_string(),
        local_version: 3,
        synced_version: 2,
        server_version: 2,
        modified_at: at(8),
        sync_status: SyncStatus::Pending,
    };

    let lines = format_setting_lines(&[row]);

    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("ui_language"));
    assert!(lines[0].contains("local=3 synced=2 server=2"));
}

#[test]
fn format_outcome_describes_each_result() {
    assert_eq!(
        format_outcome(SettingKey::UiLanguage, &SettingSyncOutcome::Synced { version: 4 }),
        "ui_language: synced at version 4"
    );
    assert_eq!(
        format_outcome(
            SettingKey::UiLanguage,
            &SettingSyncOutcome::ConflictResolved {
                adopted: "en".to_string()
            }
        ),
        "ui_language: server value 'en' adopted"
    );
}

#[test]
fn cli_parses_settings_set() {
    let cli = Cli::try_parse_from([
        "courier",
        "--user",
        "alice",
        "settings",
        "set",
        "ui_language",
        "de",
    ])
    .unwrap();
    assert_eq!(cli.user.as_deref(), Some("alice"));
    assert!(matches!(
        cli.command,
        Commands::Settings {
            command: SettingsCommands::Set { ref key, ref value }
        } if key == "ui_language" && value == "de"
    ));
}

#[test]
fn cli_parses_settings_recover() {
    let cli = Cli::try_parse_from(["courier", "settings", "recover"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Settings {
            command: SettingsCommands::Recover
        }
    ));
}

#[test]
fn cli_send_requires_text() {
    let chat_id = ChatId::new().to_string();
    assert!(Cli::try_parse_from(["courier", "send", chat_id.as_str()]).is_err());
}

#[test]
fn completions_mention_binary_name() {
    let script = String::from_utf8(render_completions(CompletionShell::Bash)).unwrap();
    assert!(script.contains("courier"));
}
