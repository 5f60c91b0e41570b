//! Search results as seen by the caller

use std::borrow::Cow;

use cs_core::DocId;

/// One document that matched and decrypted successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedDocument {
    pub doc_id: DocId,
    pub plaintext: Vec<u8>,
    /// Best per-keyword n-gram overlap; `None` outside fuzzy mode
    pub score: Option<f64>,
}

impl DecryptedDocument {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.plaintext)
    }
}

/// Decrypted matches, plus the doc_ids whose ciphertext failed authentication.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    /// In server order: doc_id ascending, or score descending for fuzzy
    pub documents: Vec<DecryptedDocument>,
    pub tampered: Vec<DocId>,
}

impl SearchResponse {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.tampered.is_empty()
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = &DocId> {
        self.documents.iter().map(|d| &d.doc_id)
    }

    /// Every returned blob failed to authenticate. With independent
    /// documents that points at a wrong password rather than tampering.
    pub fn wrong_key_suspected(&self) -> bool {
        self.documents.is_empty() && !self.tampered.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str) -> DecryptedDocument {
        DecryptedDocument {
            doc_id: DocId::from(id),
            plaintext: b"Patient presents with chest pain".to_vec(),
            score: None,
        }
    }

    #[test]
    fn test_wrong_key_suspected_only_when_all_failed() {
        let mut resp = SearchResponse::default();
        assert!(!resp.wrong_key_suspected());
        assert!(resp.is_empty());

        resp.tampered.push(DocId::from("a"));
        assert!(resp.wrong_key_suspected());

        resp.documents.push(doc("b"));
        assert!(!resp.wrong_key_suspected());
    }

    #[test]
    fn test_text_and_doc_ids() {
        let resp = SearchResponse {
            documents: vec![doc("a"), doc("b")],
            tampered: vec![],
        };
        let ids: Vec<&str> = resp.doc_ids().map(DocId::as_str).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(resp.documents[0].text(), "Patient presents with chest pain");
    }
}
