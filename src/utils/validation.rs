use std::path::Path;

/// Maximum filename length accepted as a stage object name, in bytes.
pub const MAX_FILENAME_LEN: usize = 255;

/// Characters the warehouse client expands as a glob in the local PUT path.
pub const GLOB_CHARS: [char; 4] = ['*', '?', '[', ']'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validates file size against maximum limit
pub fn validate_file_size(size: usize, max_size: usize) -> Result<(), ValidationError> {
    if size > max_size {
        return Err(ValidationError {
            code: "FILE_TOO_LARGE",
            message: format!(
                "File size {} bytes exceeds maximum allowed {} bytes ({} MB)",
                size,
                max_size,
                max_size / 1024 / 1024
            ),
        });
    }
    Ok(())
}

/// Checks that a filename can be used unchanged as the scratch file name and
/// the stage object name.
///
/// Nothing is rewritten: a name that cannot be kept byte-for-byte is refused.
pub fn validate_stage_filename(filename: &str) -> Result<(), ValidationError> {
    if filename.is_empty() {
        return Err(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename cannot be empty".to_string(),
        });
    }

    if filename.len() > MAX_FILENAME_LEN {
        return Err(ValidationError {
            code: "INVALID_FILENAME",
            message: format!("Filename exceeds {} bytes", MAX_FILENAME_LEN),
        });
    }

    if filename == "." || filename == ".." {
        return Err(ValidationError {
            code: "INVALID_FILENAME",
            message: format!("'{}' is not a file name", filename),
        });
    }

    if filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path separator in uploaded filename: {}", filename);
        return Err(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename must not contain path separators".to_string(),
        });
    }

    if filename.contains(&GLOB_CHARS[..]) {
        return Err(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename must not contain '*', '?', '[' or ']'".to_string(),
        });
    }

    if filename.chars().any(char::is_control) {
        return Err(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename must not contain control characters".to_string(),
        });
    }

    Ok(())
}

/// The file picker only offers `.csv` files; enforce the same on the server.
pub fn validate_csv_extension(filename: &str) -> Result<(), ValidationError> {
    let is_csv = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));

    if !is_csv {
        return Err(ValidationError {
            code: "UNSUPPORTED_TYPE",
            message: format!("'{}' is not a CSV file", filename),
        });
    }
    Ok(())
}

/// Rejects content with NUL bytes near the start, which no text CSV has.
pub fn validate_text_content(header: &[u8]) -> Result<(), ValidationError> {
    if header.iter().take(512).any(|&b| b == 0) {
        return Err(ValidationError {
            code: "BINARY_AS_TEXT",
            message: "File claimed as CSV but contains binary content".to_string(),
        });
    }
    Ok(())
}

/// Full intake validation for an uploaded CSV.
pub fn validate_upload(
    filename: &str,
    content: &[u8],
    max_size: usize,
) -> Result<(), ValidationError> {
    validate_stage_filename(filename)?;
    validate_csv_extension(filename)?;
    validate_file_size(content.len(), max_size)?;
    validate_text_content(content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_file_size() {
        assert!(validate_file_size(1024, 2048).is_ok());
        assert!(validate_file_size(2048, 2048).is_ok());
        assert_eq!(
            validate_file_size(2049, 2048).unwrap_err().code,
            "FILE_TOO_LARGE"
        );
    }

    #[test]
    fn test_validate_stage_filename() {
        assert!(validate_stage_filename("sales.csv").is_ok());
        assert!(validate_stage_filename("Q1 sales (final) #2.csv").is_ok());
        assert!(validate_stage_filename("o'brien+co.csv").is_ok());
        assert!(validate_stage_filename("verkäufe.csv").is_ok());

        assert!(validate_stage_filename("").is_err());
        assert!(validate_stage_filename("..").is_err());
        assert!(validate_stage_filename("../etc/passwd.csv").is_err());
        assert!(validate_stage_filename("dir\\sales.csv").is_err());
        assert!(validate_stage_filename("bad\nname.csv").is_err());
        assert!(validate_stage_filename(&"a".repeat(256)).is_err());

        for name in ["report[2024].csv", "sales*.csv", "sales?.csv", "q]1.csv"] {
            assert_eq!(
                validate_stage_filename(name).unwrap_err().code,
                "INVALID_FILENAME",
                "{}",
                name
            );
        }
    }

    #[test]
    fn test_validate_csv_extension() {
        assert!(validate_csv_extension("sales.csv").is_ok());
        assert!(validate_csv_extension("SALES.CSV").is_ok());
        assert!(validate_csv_extension("sales.txt").is_err());
        assert!(validate_csv_extension("csv").is_err());
    }

    #[test]
    fn test_validate_upload() {
        assert!(validate_upload("sales.csv", b"id\n1\n", 1024).is_ok());
        assert_eq!(
            validate_upload("sales.csv", b"id\0\n", 1024).unwrap_err().code,
            "BINARY_AS_TEXT"
        );
        assert_eq!(
            validate_upload("sales.csv", &[b'a'; 16], 8).unwrap_err().code,
            "FILE_TOO_LARGE"
        );
        assert_eq!(
            validate_upload("sales.xlsx", b"id\n", 1024).unwrap_err().code,
            "UNSUPPORTED_TYPE"
        );
    }
}
