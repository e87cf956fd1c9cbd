//! User-facing texts, reply keyboards and the reply helper.

use crate::session::UserId;
use crate::transport::{Transport, TransportError};
use tracing::warn;

/// Reply keyboard shown under a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Menu {
    Main,
    FinishUpload,
    Description,
}

impl Menu {
    /// Button labels, row by row
    pub fn rows(&self) -> Vec<Vec<&'static str>> {
        match self {
            Menu::Main => vec![vec![Button::UploadPhoto.label()], vec![Button::SearchPhoto.label()]],
            Menu::FinishUpload => vec![vec![Button::FinishUpload.label()]],
            Menu::Description => vec![vec![
                Button::AddDescription.label(),
                Button::SkipDescription.label(),
            ]],
        }
    }
}

/// Reply keyboard buttons; pressing one sends its label as text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    UploadPhoto,
    SearchPhoto,
    FinishUpload,
    AddDescription,
    SkipDescription,
}

impl Button {
    const ALL: [Button; 5] = [
        Button::UploadPhoto,
        Button::SearchPhoto,
        Button::FinishUpload,
        Button::AddDescription,
        Button::SkipDescription,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Button::UploadPhoto => "Upload photo",
            Button::SearchPhoto => "Find photo",
            Button::FinishUpload => "Finish",
            Button::AddDescription => "Add description",
            Button::SkipDescription => "Continue",
        }
    }

    pub fn from_label(text: &str) -> Option<Button> {
        Button::ALL.into_iter().find(|b| b.label() == text)
    }
}

pub const MSG_RATE_LIMITED: &str = "Too many requests. Please wait a little.";

pub const MSG_HELP: &str = "Send photos and tag them with a description, then find them by tag.\n\n\
    1. Press \"Upload photo\" and send one or more photos.\n\
    2. Press \"Finish\", then add a description (words become tags) or continue without one.\n\
    3. Press \"Find photo\" and send a single tag.";

pub const MSG_INFO: &str = "Tags may contain letters, digits, \"_\" and \"-\". \
    A description is split into tags on whitespace.";

/// One reply: an emoji message followed by the text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub emoji: &'static str,
    pub text: String,
    pub menu: Option<Menu>,
}

impl Reply {
    pub fn new(emoji: &'static str, text: impl Into<String>) -> Self {
        Self {
            emoji,
            text: text.into(),
            menu: None,
        }
    }

    pub fn with_menu(mut self, menu: Menu) -> Self {
        self.menu = Some(menu);
        self
    }

    pub fn welcome_new() -> Self {
        Reply::new("👋", "Welcome! You can upload photos and find them later by tag.").with_menu(Menu::Main)
    }

    pub fn welcome_back() -> Self {
        Reply::new("🙌", "Welcome back!").with_menu(Menu::Main)
    }

    pub fn register_error() -> Self {
        Reply::new("⚠️", "Registration failed. Please try /start again later.")
    }

    pub fn use_buttons() -> Self {
        Reply::new("👇", "Please use the buttons below.").with_menu(Menu::Main)
    }

    pub fn upload_prompt() -> Self {
        Reply::new("📷", "Send one or more photos, then press \"Finish\".").with_menu(Menu::FinishUpload)
    }

    pub fn photo_added() -> Self {
        Reply::new("✅", "Photo added. Send more or press \"Finish\".").with_menu(Menu::FinishUpload)
    }

    pub fn photo_too_large(max_bytes: u64) -> Self {
        Reply::new(
            "⚠️",
            format!("File is too large. Maximum size: {} MB", max_bytes / (1024 * 1024)),
        )
    }

    pub fn invalid_photo(reason: impl std::fmt::Display) -> Self {
        Reply::new("⚠️", format!("This photo cannot be added: {reason}."))
    }

    pub fn photo_already_exists() -> Self {
        Reply::new("♻️", "This photo has already been added.")
    }

    pub fn photo_limit_reached(max: usize) -> Self {
        Reply::new("🛑", format!("Photo limit reached: at most {max} photos per upload."))
    }

    pub fn photo_check_error() -> Self {
        Reply::new("⚠️", "Could not check the photo. Upload cancelled, please try again.").with_menu(Menu::Main)
    }

    pub fn nothing_to_save() -> Self {
        Reply::new("🤷", "No photos to save.").with_menu(Menu::Main)
    }

    pub fn description_choice(count: usize) -> Self {
        Reply::new(
            "📝",
            format!("Received {count} photo(s). Add a description or continue without one?"),
        )
        .with_menu(Menu::Description)
    }

    pub fn enter_description() -> Self {
        Reply::new("✍️", "Send a description. Each word becomes a tag.")
    }

    pub fn description_too_long(max: usize) -> Self {
        Reply::new("✂️", format!("Description is too long: maximum {max} characters. Try again."))
    }

    pub fn invalid_description(reason: impl std::fmt::Display) -> Self {
        Reply::new("⚠️", format!("Invalid description: {reason}. Try again."))
    }

    pub fn photos_saved(count: usize) -> Self {
        Reply::new("💾", format!("Saved {count} photo(s).")).with_menu(Menu::Main)
    }

    pub fn photos_saved_with_description(count: usize) -> Self {
        Reply::new("🏷️", format!("Saved {count} photo(s) with description.")).with_menu(Menu::Main)
    }

    pub fn save_error() -> Self {
        Reply::new("⚠️", "No photos were saved. Please try again.").with_menu(Menu::Main)
    }

    pub fn search_prompt() -> Self {
        Reply::new("🔎", "Send a tag to search for.")
    }

    pub fn invalid_tag(reason: impl std::fmt::Display) -> Self {
        Reply::new("⚠️", format!("Invalid tag: {reason}.")).with_menu(Menu::Main)
    }

    pub fn search_user_not_found() -> Self {
        Reply::new("❓", "You are not registered yet. Send /start first.").with_menu(Menu::Main)
    }

    pub fn search_error() -> Self {
        Reply::new("⚠️", "Search failed. Please try again later.").with_menu(Menu::Main)
    }

    pub fn search_no_results() -> Self {
        Reply::new("📭", "No photos found for this tag.").with_menu(Menu::Main)
    }

    pub fn search_results(count: usize) -> Self {
        Reply::new("📸", format!("Found {count} photo(s):"))
    }

    pub fn search_completed() -> Self {
        Reply::new("✅", "That's all.").with_menu(Menu::Main)
    }
}

/// Send a reply as emoji then text
pub async fn send_reply(transport: &dyn Transport, user_id: UserId, reply: &Reply) -> Result<(), TransportError> {
    transport.send_text(user_id, reply.emoji, None).await?;
    transport.send_text(user_id, &reply.text, reply.menu).await
}

/// Send a reply, logging instead of propagating delivery failures
pub async fn deliver(transport: &dyn Transport, user_id: UserId, reply: Reply) {
    if let Err(e) = send_reply(transport, user_id, &reply).await {
        warn!(user_id, error = %e, "Failed to deliver reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{RecordingTransport, Sent};

    #[test]
    fn test_button_labels_round_trip() {
        for button in Button::ALL {
            assert_eq!(Button::from_label(button.label()), Some(button));
        }
        assert_eq!(Button::from_label("upload photo"), None);
    }

    #[test]
    fn test_menu_layouts() {
        assert_eq!(Menu::Main.rows().len(), 2);
        assert_eq!(Menu::Description.rows(), vec![vec!["Add description", "Continue"]]);
    }

    #[tokio::test]
    async fn test_send_reply_sends_emoji_then_text() {
        let transport = RecordingTransport::new();
        send_reply(&transport, 5, &Reply::photos_saved(2)).await.unwrap();

        assert_eq!(
            transport.sent(),
            vec![
                Sent::Text {
                    user_id: 5,
                    text: "💾".to_string(),
                    menu: None
                },
                Sent::Text {
                    user_id: 5,
                    text: "Saved 2 photo(s).".to_string(),
                    menu: Some(Menu::Main)
                },
            ]
        );
    }
}
