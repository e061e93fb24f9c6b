//! Id generation.
//!
//! Rows created app-side (projects, API keys, domains) get time-ordered v7
//! ids. Values handed to clients as bearer material (session ids, token ids)
//! get random v4 ids so they reveal nothing about when they were minted.

use uuid::Uuid;

/// Time-ordered id for new rows.
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}

/// Random id for sessions and token ids.
pub fn random_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_ids_are_v7_and_ordered() {
        let a = uuidv7();
        let b = uuidv7();
        assert_eq!(a.get_version(), Some(uuid::Version::SortRand));
        assert!(b >= a);
    }

    #[test]
    fn random_ids_are_v4() {
        let id = Uuid::parse_str(&random_id()).unwrap();
        assert_eq!(id.get_version(), Some(uuid::Version::Random));
        assert_ne!(random_id(), random_id());
    }
}
