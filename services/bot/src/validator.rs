//! Input validation and sanitisation for user-supplied values.

use crate::config::LimitsConfig;
use regex::Regex;
use thiserror::Error;

/// Letters (latin and cyrillic), digits, underscore and hyphen.
const TAG_PATTERN: &str = r"^[a-zA-Z0-9а-яА-ЯёЁ_-]+$";

const MIN_TAG_LEN: usize = 1;
const MIN_USERNAME_LEN: usize = 1;

/// Reasons a value fails validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("{field} is too short: minimum {min} characters")]
    TooShort { field: &'static str, min: usize },

    #[error("{field} is too long: maximum {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("tag contains invalid characters: only letters, numbers, underscore and hyphen are allowed")]
    InvalidCharacters,

    #[error("too many tags: maximum {max} tags per photo")]
    TooManyTags { max: usize },

    #[error("invalid tag at position {position}: {source}")]
    InvalidTagAt {
        position: usize,
        #[source]
        source: Box<ValidationError>,
    },

    #[error("file size must be positive")]
    NonPositiveSize,

    #[error("file is too large: maximum {max} bytes")]
    FileTooLarge { max: u64 },
}

/// Validates tags, descriptions, usernames and file sizes against configured limits
#[derive(Debug, Clone)]
pub struct Validator {
    limits: LimitsConfig,
    tag_regex: Regex,
}

impl Validator {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            limits,
            tag_regex: Regex::new(TAG_PATTERN).expect("tag pattern is a valid regex"),
        }
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    pub fn validate_tag(&self, tag: &str) -> Result<(), ValidationError> {
        if tag.is_empty() {
            return Err(ValidationError::Empty("tag"));
        }

        let len = tag.chars().count();
        if len < MIN_TAG_LEN {
            return Err(ValidationError::TooShort {
                field: "tag",
                min: MIN_TAG_LEN,
            });
        }
        if len > self.limits.max_tag_len {
            return Err(ValidationError::TooLong {
                field: "tag",
                max: self.limits.max_tag_len,
            });
        }

        if !self.tag_regex.is_match(tag) {
            return Err(ValidationError::InvalidCharacters);
        }

        Ok(())
    }

    pub fn validate_tags(&self, tags: &[String]) -> Result<(), ValidationError> {
        if tags.len() > self.limits.max_tags_per_photo {
            return Err(ValidationError::TooManyTags {
                max: self.limits.max_tags_per_photo,
            });
        }

        for (i, tag) in tags.iter().enumerate() {
            self.validate_tag(tag)
                .map_err(|e| ValidationError::InvalidTagAt {
                    position: i + 1,
                    source: Box::new(e),
                })?;
        }

        Ok(())
    }

    pub fn validate_description(&self, description: &str) -> Result<(), ValidationError> {
        if description.is_empty() {
            return Err(ValidationError::Empty("description"));
        }

        if description.chars().count() > self.limits.max_description_len {
            return Err(ValidationError::TooLong {
                field: "description",
                max: self.limits.max_description_len,
            });
        }

        Ok(())
    }

    /// Validate a description and split it into whitespace-separated tags
    pub fn validate_and_parse_tags(&self, description: &str) -> Result<Vec<String>, ValidationError> {
        self.validate_description(description)?;

        let tags: Vec<String> = description.split_whitespace().map(str::to_string).collect();
        self.validate_tags(&tags)?;

        Ok(tags)
    }

    pub fn validate_file_size(&self, size: i64) -> Result<(), ValidationError> {
        if size <= 0 {
            return Err(ValidationError::NonPositiveSize);
        }

        if size as u64 > self.limits.max_file_size_bytes {
            return Err(ValidationError::FileTooLarge {
                max: self.limits.max_file_size_bytes,
            });
        }

        Ok(())
    }

    pub fn validate_username(&self, username: &str) -> Result<(), ValidationError> {
        if username.is_empty() {
            return Err(ValidationError::Empty("username"));
        }

        let len = username.chars().count();
        if len < MIN_USERNAME_LEN {
            return Err(ValidationError::TooShort {
                field: "username",
                min: MIN_USERNAME_LEN,
            });
        }
        if len > self.limits.max_username_len {
            return Err(ValidationError::TooLong {
                field: "username",
                max: self.limits.max_username_len,
            });
        }

        Ok(())
    }
}

/// Strip NUL and control characters (keeping newlines and tabs) and trim
pub fn sanitize(s: &str) -> String {
    s.chars()
        .filter(|&c| !(c == '\0' || (c < ' ' && c != '\n' && c != '\r' && c != '\t')))
        .collect::<String>()
        .trim()
        .to_string()
}
