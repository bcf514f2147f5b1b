//! User-facing message texts.
//!
//! Messages are sent with HTML parse mode, so anything derived from user
//! content goes through [`escape_html`] first.

use std::time::Duration;

use voxbot_chat::Member;
use voxbot_core::split_text;
use voxbot_transcribe::ModelInfo;

pub const QUEUED: &str = "Queued...";
pub const TRANSCRIBING: &str = "Transcribing...";
pub const NOTHING_RECOGNIZED: &str = "Could not recognize any speech in this recording";
pub const TRANSCRIPTION_FAILED: &str = "An error occurred during transcription";
pub const DOWNLOAD_FAILED: &str = "Could not download the recording, please send it again";
pub const MAINTENANCE: &str = "The bot is under maintenance right now, sorry for the inconvenience";
pub const BOT_NOT_ADMIN: &str = "The bot must be an administrator to mention members.";
pub const NO_MEMBERS: &str = "Could not find any members to mention.";
pub const MEMBERS_FAILED: &str = "Could not get the list of chat members.";

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// First message of a transcript, replacing the status message.
pub fn first_chunk(chunk: &str, elapsed: Duration) -> String {
    format!(
        "Transcribed text:\n\n<blockquote expandable>{}</blockquote>\n\nRecognition time: {:.2} s",
        escape_html(chunk),
        elapsed.as_secs_f64()
    )
}

/// Every message of a transcript after the first.
pub fn continuation_chunk(chunk: &str) -> String {
    format!("<blockquote expandable>{}</blockquote>", escape_html(chunk))
}

pub fn asr_status(info: &ModelInfo, worker_state: &str, queue_len: usize) -> String {
    let mut status = String::from("<b>ASR status</b>\n\n");
    status.push_str(&format!("<b>Provider:</b> {}\n", escape_html(&info.provider)));
    status.push_str(&format!("<b>Model:</b> {}\n", escape_html(&info.model)));
    if let Some(device) = &info.device {
        status.push_str(&format!("<b>Device:</b> {}\n", escape_html(device)));
    }
    let loaded = if info.is_loaded { "loaded" } else { "not loaded" };
    status.push_str(&format!("<b>State:</b> {loaded}\n"));
    if let Some(language) = &info.language {
        status.push_str(&format!("<b>Language:</b> {}\n", escape_html(language)));
    }
    if !info.supported_formats.is_empty() {
        status.push_str(&format!(
            "<b>Formats:</b> {}\n",
            info.supported_formats.join(", ")
        ));
    }
    status.push_str(&format!("<b>Worker:</b> {worker_state}\n"));
    status.push_str(&format!("\n<b>Queue:</b> {queue_len} jobs"));
    status
}

/// Groups lines into messages of at most `max_length` characters.
///
/// Lines stay whole and keep their line breaks; only a line that is longer
/// than the limit on its own is cut with [`split_text`].
pub fn pack_lines(text: &str, max_length: usize) -> Vec<String> {
    let mut messages = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for line in text.lines() {
        for piece in split_text(line, max_length) {
            let len = piece.chars().count();
            if current_len > 0 && current_len + 1 + len > max_length {
                messages.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push('\n');
                current_len += 1;
            }
            current.push_str(&piece);
            current_len += len;
        }
    }
    if current_len > 0 || messages.is_empty() {
        messages.push(current);
    }
    messages
}

/// Mention for a member: `@username`, or a link to the user id.
pub fn mention(member: &Member) -> String {
    match &member.username {
        Some(username) => format!("@{username}"),
        None => format!(
            "<a href=\"tg://user?id={}\">{}</a>",
            member.user_id,
            escape_html(&member.first_name)
        ),
    }
}
