//! Slash-command menu synchronization.
//!
//! Telegram lets a bot scope its command list per chat (DMs) or per chat
//! member (groups/topics). The menu contents depend on where the user is
//! and what they can do there; results are cached by `(chat, user)` so
//! repeated syncs cost nothing.

use teloxide::types::BotCommand;

use tg_channels::types::MenuContext;

/// The commands appropriate for `ctx`, in display order.
pub fn commands_for(ctx: &MenuContext) -> Vec<BotCommand> {
    let mut out = Vec::new();

    if !ctx.paired {
        out.push(BotCommand::new("pair", "Pair this account with touchgrass"));
        out.push(BotCommand::new("help", "How pairing works"));
        return out;
    }

    if ctx.is_group && !ctx.is_linked_group {
        out.push(BotCommand::new("link", "Link this group to touchgrass"));
        out.push(BotCommand::new("help", "Show help"));
        return out;
    }

    if ctx.has_active_session {
        out.push(BotCommand::new("files", "Mention repo files"));
        out.push(BotCommand::new("stop", "Interrupt the tool"));
        out.push(BotCommand::new("kill", "Kill the tool"));
        out.push(BotCommand::new("restart", "Restart and resume"));
        out.push(BotCommand::new("output_mode", "Simple or verbose output"));
        out.push(BotCommand::new("thinking", "Toggle reasoning stream"));
        out.push(BotCommand::new("background_jobs", "Show background jobs"));
        out.push(BotCommand::new("detach", "Detach this chat"));
    } else {
        out.push(BotCommand::new("sessions", "List running sessions"));
        out.push(BotCommand::new("attach", "Attach a session here"));
        out.push(BotCommand::new("resume", "Resume a past session"));
    }

    if ctx.is_group {
        out.push(BotCommand::new("unlink", "Unlink this group"));
    }
    out.push(BotCommand::new("help", "Show help"));
    out
}

/// Cache key for a synced menu.
pub fn cache_key(ctx: &MenuContext) -> String {
    format!("{}|{}", ctx.chat_id, ctx.user_id)
}

/// Cheap structural hash so identical menus are not re-sent.
pub fn menu_digest(commands: &[BotCommand]) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for c in commands {
        c.command.hash(&mut hasher);
        c.description.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_core::address::{ChatId, UserId};

    fn ctx(paired: bool, is_group: bool, linked: bool, active: bool) -> MenuContext {
        MenuContext {
            chat_id: ChatId::new("telegram:42"),
            user_id: UserId::new("telegram:42"),
            paired,
            is_group,
            is_linked_group: linked,
            has_active_session: active,
        }
    }

    #[test]
    fn unpaired_user_sees_pair_only() {
        let commands = commands_for(&ctx(false, false, false, false));
        assert!(commands.iter().any(|c| c.command == "pair"));
        assert!(!commands.iter().any(|c| c.command == "stop"));
    }

    #[test]
    fn unlinked_group_sees_link() {
        let commands = commands_for(&ctx(true, true, false, false));
        assert_eq!(commands[0].command, "link");
    }

    #[test]
    fn active_session_menu_has_controls() {
        let commands = commands_for(&ctx(true, false, false, true));
        for want in ["files", "stop", "kill", "restart", "output_mode"] {
            assert!(
                commands.iter().any(|c| c.command == want),
                "missing {want}"
            );
        }
    }

    #[test]
    fn digest_distinguishes_menus() {
        let a = menu_digest(&commands_for(&ctx(true, false, false, true)));
        let b = menu_digest(&commands_for(&ctx(true, false, false, false)));
        assert_ne!(a, b);
        let a2 = menu_digest(&commands_for(&ctx(true, false, false, true)));
        assert_eq!(a, a2);
    }
}
