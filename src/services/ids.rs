use uuid::Uuid;

pub const DATASET_ID_LEN: usize = 8;
const MAX_DATASET_ID_LEN: usize = 64;

/// Random 8-character lowercase hex token.
pub fn generate_dataset_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(DATASET_ID_LEN);
    id
}

/// Identifiers double as file names, so only `[A-Za-z0-9_-]` is accepted.
pub fn is_valid_dataset_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_DATASET_ID_LEN
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_short_and_valid() {
        let id = generate_dataset_id();
        assert_eq!(id.len(), DATASET_ID_LEN);
        assert!(is_valid_dataset_id(&id));
        assert_ne!(id, generate_dataset_id());
    }

    #[test]
    fn rejects_path_like_ids() {
        assert!(!is_valid_dataset_id(""));
        assert!(!is_valid_dataset_id("../etc"));
        assert!(!is_valid_dataset_id("a/b"));
        assert!(!is_valid_dataset_id(&"x".repeat(65)));
        assert!(is_valid_dataset_id("ab12-CD_9"));
    }
}
