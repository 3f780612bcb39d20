/// One nearest-neighbor match: the stored position and its squared-L2
/// distance from the query vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub position: usize,
    pub distance: f32,
}

impl SearchHit {
    /// Similarity score as displayed to users (`1 - distance`), matching the
    /// convention of FAISS flat-L2 consumers.
    #[must_use]
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }
}

/// A search hit joined back to the snippet text that produced the stored
/// vector at that position.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedSnippet {
    pub position: usize,
    pub snippet: String,
    pub distance: f32,
}

impl RankedSnippet {
    #[must_use]
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }
}
