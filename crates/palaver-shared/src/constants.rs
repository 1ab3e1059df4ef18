/// File name of the local cache database
pub const DB_FILE_NAME: &str = "palaver.db";

/// Placeholder shown for a conversation participant with no user record
pub const UNKNOWN_PARTICIPANT_FULLNAME: &str = "Unknown";
pub const UNKNOWN_PARTICIPANT_USERNAME: &str = "unknown";

/// Placeholder shown for a message sender with no user record
pub const UNKNOWN_SENDER_FULLNAME: &str = "Unknown User";

/// Day bucket key used when grouping messages (e.g. `07-03-2025`)
pub const DAY_KEY_FORMAT: &str = "%d-%m-%Y";

/// Title given to a direct conversation when the contact cannot be looked up
pub const DEFAULT_DIRECT_TITLE: &str = "New Chat";
