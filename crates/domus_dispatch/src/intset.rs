//! Integer Set
//!
//! A bitmap-backed set of small positive integers. The subscription index
//! keeps one of these per attribute value, so union and intersection are
//! word-at-a-time operations.

const WORD_BITS: usize = 64;

/// Mutable set of handler identifiers
///
/// The backing bitmap never carries trailing zero words, so two sets with
/// the same members always compare equal regardless of how they were built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntSet {
    words: Vec<u64>,
    len: usize,
}

impl IntSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty set with room for ids below `hint` without reallocating
    pub fn with_capacity(hint: usize) -> Self {
        Self {
            words: Vec::with_capacity(hint.div_ceil(WORD_BITS)),
            len: 0,
        }
    }

    /// Insert an id, returning `true` if it was not already present
    pub fn add(&mut self, id: usize) -> bool {
        let (word, mask) = Self::slot(id);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }

        let present = self.words[word] & mask != 0;
        if !present {
            self.words[word] |= mask;
            self.len += 1;
        }
        !present
    }

    /// Remove an id, returning `true` if it was present
    pub fn remove(&mut self, id: usize) -> bool {
        let (word, mask) = Self::slot(id);
        match self.words.get_mut(word) {
            Some(bits) if *bits & mask != 0 => {
                *bits &= !mask;
                self.len -= 1;
                self.trim();
                true
            }
            _ => false,
        }
    }

    /// Check membership
    pub fn contains(&self, id: usize) -> bool {
        let (word, mask) = Self::slot(id);
        self.words.get(word).is_some_and(|bits| bits & mask != 0)
    }

    /// Add every member of `other` to this set
    pub fn union_with(&mut self, other: &IntSet) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (mine, theirs) in self.words.iter_mut().zip(&other.words) {
            *mine |= *theirs;
        }
        self.recount();
    }

    /// Keep only the members also present in `other`
    pub fn intersect_with(&mut self, other: &IntSet) {
        self.words.truncate(other.words.len());
        for (mine, theirs) in self.words.iter_mut().zip(&other.words) {
            *mine &= *theirs;
        }
        self.trim();
        self.recount();
    }

    /// Return a new set holding the members of both sets
    pub fn union(&self, other: &IntSet) -> IntSet {
        let mut out = self.clone();
        out.union_with(other);
        out
    }

    /// Return a new set holding the members common to both sets
    pub fn intersection(&self, other: &IntSet) -> IntSet {
        let mut out = self.clone();
        out.intersect_with(other);
        out
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the set has no members
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Members in ascending order
    pub fn elems(&self) -> Vec<usize> {
        self.iter().collect()
    }

    /// Iterate over members in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(index, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(index * WORD_BITS + bit)
            })
        })
    }

    fn slot(id: usize) -> (usize, u64) {
        (id / WORD_BITS, 1u64 << (id % WORD_BITS))
    }

    fn trim(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }

    fn recount(&mut self) {
        self.len = self.words.iter().map(|w| w.count_ones() as usize).sum();
    }
}

impl FromIterator<usize> for IntSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = IntSet::new();
        set.extend(iter);
        set
    }
}

impl Extend<usize> for IntSet {
    fn extend<I: IntoIterator<Item = usize>>(&mut self, iter: I) {
        for id in iter {
            self.add(id);
        }
    }
}
