//! Text deltas: compute a patch list between two snapshots and apply it,
//! best effort, to a snapshot that may have drifted.
//!
//! ```text
//!  old ──char diff──► edits ──split + context──► Delta [Patch, Patch, ...]
//!
//!  base ──locate(source text, start2 + drift)──► exact? splice target
//!                                              └ fuzzy? map edits through diff(source, window)
//!                                              └ none?  skip, keep going
//! ```
//!
//! Positions and lengths are counted in `char`s. Each patch carries a few
//! chars of surrounding context, grown until the context is unique in the
//! text it was computed from, so it can be relocated after drift.
//!
//! Applying never fails. A patch that cannot be located is skipped and
//! reported as `false` in [`Applied::results`]; the caller keeps the
//! approximation.

use serde::{Deserialize, Serialize};
use similar::{capture_diff_slices, Algorithm, DiffTag};

/// Chars of context kept around each patch.
pub const PATCH_MARGIN: usize = 4;

/// Longest pattern used when searching for a patch location.
pub const MATCH_MAX_CHARS: usize = 32;

/// One diff operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edit {
    Equal(String),
    Delete(String),
    Insert(String),
}

impl Edit {
    pub fn text(&self) -> &str {
        match self {
            Edit::Equal(s) | Edit::Delete(s) | Edit::Insert(s) => s,
        }
    }

    pub fn char_len(&self) -> usize {
        self.text().chars().count()
    }

    fn same_kind(&self, other: &Edit) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    fn text_mut(&mut self) -> &mut String {
        match self {
            Edit::Equal(s) | Edit::Delete(s) | Edit::Insert(s) => s,
        }
    }
}

/// A localized group of edits plus context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub start1: usize,
    pub start2: usize,
    pub length1: usize,
    pub length2: usize,
    pub edits: Vec<Edit>,
}

impl Patch {
    /// Text this patch expects to find (context + deletions).
    pub fn source_text(&self) -> String {
        self.edits
            .iter()
            .filter(|e| !matches!(e, Edit::Insert(_)))
            .map(Edit::text)
            .collect()
    }

    /// Text this patch leaves behind (context + insertions).
    pub fn target_text(&self) -> String {
        self.edits
            .iter()
            .filter(|e| !matches!(e, Edit::Delete(_)))
            .map(Edit::text)
            .collect()
    }
}

/// A change set between two text snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Delta {
    patches: Vec<Patch>,
}

impl Delta {
    pub fn new(patches: Vec<Patch>) -> Self {
        Self { patches }
    }

    /// The empty delta.
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn is_noop(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }
}

/// Result of a best-effort apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub text: String,
    /// Whether each patch, in order, was placed.
    pub results: Vec<bool>,
}

impl Applied {
    pub fn all_applied(&self) -> bool {
        self.results.iter().all(|r| *r)
    }
}

/// Delta strategy used by the sync engine.
pub trait Patcher {
    /// Delta turning `old` into `new`; the no-op delta when they are equal.
    fn compute(&self, old: &str, new: &str) -> Delta;

    /// Apply `delta` to `base`, relocating or skipping patches as needed.
    fn apply(&self, base: &str, delta: &Delta) -> Applied;

    /// Delta that builds `text` from an empty document.
    fn first_delta(&self, text: &str) -> Delta {
        self.compute("", text)
    }
}

/// Char-level diff/patch with context-based fuzzy relocation.
#[derive(Debug, Clone)]
pub struct DiffPatcher {
    /// Context chars kept around each patch.
    pub margin: usize,
    /// Highest acceptable match score (0.0 exact, 1.0 anything).
    pub match_threshold: f64,
    /// How far from the expected location a match may sit before its
    /// score reaches 1.0.
    pub match_distance: usize,
    /// Highest tolerated edit ratio between a patch's source text and
    /// the window it was located at.
    pub delete_threshold: f64,
}

impl Default for DiffPatcher {
    fn default() -> Self {
        Self {
            margin: PATCH_MARGIN,
            match_threshold: 0.5,
            match_distance: 1000,
            delete_threshold: 0.5,
        }
    }
}

impl Patcher for DiffPatcher {
    fn compute(&self, old: &str, new: &str) -> Delta {
        if old == new {
            return Delta::noop();
        }
        let old: Vec<char> = old.chars().collect();
        let new: Vec<char> = new.chars().collect();
        let edits = diff_chars(&old, &new);
        Delta::new(self.make_patches(&old, &edits))
    }

    fn apply(&self, base: &str, delta: &Delta) -> Applied {
        let mut text: Vec<char> = base.chars().collect();
        let mut results = Vec::with_capacity(delta.patches.len());
        let mut drift: isize = 0;

        for patch in &delta.patches {
            let source: Vec<char> = patch.source_text().chars().collect();
            let target: Vec<char> = patch.target_text().chars().collect();
            let expected = (patch.start2 as isize + drift).max(0) as usize;

            let Some(start) = self.locate(&text, &source, expected) else {
                log::trace!("patch at {} not located, skipping", patch.start2);
                drift -= patch.length2 as isize - patch.length1 as isize;
                results.push(false);
                continue;
            };
            drift = start as isize - patch.start2 as isize;

            let end = (start + source.len()).min(text.len());
            let window = &text[start..end];
            if window == source.as_slice() {
                text.splice(start..end, target);
                results.push(true);
                continue;
            }

            let diffs = diff_chars(&source, window);
            let ratio = levenshtein(&diffs) as f64 / source.len().max(1) as f64;
            if ratio > self.delete_threshold {
                log::trace!("patch at {start} too far from its context ({ratio:.2}), skipping");
                results.push(false);
                continue;
            }
            let patched = patch_window(window, &diffs, &patch.edits);
            text.splice(start..end, patched);
            results.push(true);
        }

        Applied {
            text: text.into_iter().collect(),
            results,
        }
    }
}

impl DiffPatcher {
    fn make_patches(&self, text1: &[char], edits: &[Edit]) -> Vec<Patch> {
        let mut patches = Vec::new();
        let Some(last) = edits.len().checked_sub(1) else {
            return patches;
        };
        let span = 2 * self.margin;

        let mut patch = Patch::default();
        let mut count1 = 0;
        let mut count2 = 0;
        // Text as of the last emitted patch, and as of the current edit.
        let mut prepatch = text1.to_vec();
        let mut postpatch = text1.to_vec();

        for (i, edit) in edits.iter().enumerate() {
            let len = edit.char_len();
            if patch.edits.is_empty() && !matches!(edit, Edit::Equal(_)) {
                patch.start1 = count1;
                patch.start2 = count2;
            }

            match edit {
                Edit::Insert(s) => {
                    push_edit(&mut patch.edits, edit.clone());
                    patch.length2 += len;
                    postpatch.splice(count2..count2, s.chars());
                }
                Edit::Delete(_) => {
                    push_edit(&mut patch.edits, edit.clone());
                    patch.length1 += len;
                    postpatch.drain(count2..count2 + len);
                }
                Edit::Equal(_) => {
                    if len <= span && !patch.edits.is_empty() && i != last {
                        push_edit(&mut patch.edits, edit.clone());
                        patch.length1 += len;
                        patch.length2 += len;
                    }
                    if len >= span && !patch.edits.is_empty() {
                        self.add_context(&mut patch, &prepatch);
                        patches.push(std::mem::take(&mut patch));
                        prepatch.clone_from(&postpatch);
                        count1 = count2;
                    }
                }
            }

            if !matches!(edit, Edit::Insert(_)) {
                count1 += len;
            }
            if !matches!(edit, Edit::Delete(_)) {
                count2 += len;
            }
        }

        if !patch.edits.is_empty() {
            self.add_context(&mut patch, &prepatch);
            patches.push(patch);
        }
        patches
    }

    /// Surround `patch` with enough context to be unique in `text`.
    fn add_context(&self, patch: &mut Patch, text: &[char]) {
        if text.is_empty() {
            return;
        }
        let start = patch.start2.min(text.len());
        let end = (patch.start2 + patch.length1).min(text.len());
        let max_pattern = MATCH_MAX_CHARS.saturating_sub(2 * self.margin);

        let mut padding = 0;
        let mut pattern = &text[start..end];
        while pattern.len() < max_pattern
            && find_chars(text, pattern, 0) != rfind_chars(text, pattern)
        {
            padding += self.margin;
            pattern = &text[start.saturating_sub(padding)..(end + padding).min(text.len())];
        }
        padding += self.margin;

        let prefix = &text[start.saturating_sub(padding)..start];
        if !prefix.is_empty() {
            patch.edits.insert(0, Edit::Equal(prefix.iter().collect()));
        }
        let suffix = &text[end..(end + padding).min(text.len())];
        if !suffix.is_empty() {
            push_edit(&mut patch.edits, Edit::Equal(suffix.iter().collect()));
        }

        patch.start1 = patch.start1.saturating_sub(prefix.len());
        patch.start2 -= prefix.len();
        patch.length1 += prefix.len() + suffix.len();
        patch.length2 += prefix.len() + suffix.len();
    }

    /// Find where `pattern` best fits in `text`, near `expected`.
    fn locate(&self, text: &[char], pattern: &[char], expected: usize) -> Option<usize> {
        let loc = expected.min(text.len());
        if pattern.is_empty() {
            return Some(loc);
        }
        if text.is_empty() {
            return None;
        }
        if text[loc..].starts_with(pattern) {
            return Some(loc);
        }

        let head = &pattern[..pattern.len().min(MATCH_MAX_CHARS)];

        // Nearest exact occurrence.
        let mut best: Option<(f64, usize)> = None;
        let mut from = 0;
        while let Some(found) = find_chars(text, head, from) {
            let score = self.proximity(found, loc);
            if best.map_or(true, |(s, _)| score < s) {
                best = Some((score, found));
            }
            from = found + 1;
        }
        if let Some((score, found)) = best {
            if score <= self.match_threshold {
                return Some(found);
            }
        }

        // Approximate scan around the expected location.
        let radius = (self.match_threshold * self.match_distance as f64) as usize;
        let lo = loc.saturating_sub(radius);
        let hi = (loc + radius).min(text.len());
        let mut best: Option<(f64, usize)> = None;
        for candidate in lo..=hi {
            let proximity = self.proximity(candidate, loc);
            if best.is_some_and(|(s, _)| proximity >= s) {
                continue;
            }
            let window = &text[candidate..(candidate + head.len()).min(text.len())];
            if window.is_empty() {
                continue;
            }
            let errors = edit_distance(head, window) as f64 / head.len() as f64;
            let score = errors + proximity;
            if score <= self.match_threshold && best.map_or(true, |(s, _)| score < s) {
                best = Some((score, candidate));
            }
        }
        best.map(|(_, candidate)| candidate)
    }

    fn proximity(&self, candidate: usize, loc: usize) -> f64 {
        let distance = candidate.abs_diff(loc);
        if self.match_distance == 0 {
            return if distance == 0 { 0.0 } else { 1.0 };
        }
        distance as f64 / self.match_distance as f64
    }
}

/// Char-level diff as a merged edit list.
fn diff_chars(old: &[char], new: &[char]) -> Vec<Edit> {
    let mut edits = Vec::new();
    for op in capture_diff_slices(Algorithm::Myers, old, new) {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        let removed: String = old[old_range].iter().collect();
        let added: String = new[new_range].iter().collect();
        match tag {
            DiffTag::Equal => push_edit(&mut edits, Edit::Equal(removed)),
            DiffTag::Delete => push_edit(&mut edits, Edit::Delete(removed)),
            DiffTag::Insert => push_edit(&mut edits, Edit::Insert(added)),
            DiffTag::Replace => {
                push_edit(&mut edits, Edit::Delete(removed));
                push_edit(&mut edits, Edit::Insert(added));
            }
        }
    }
    edits
}

fn push_edit(edits: &mut Vec<Edit>, edit: Edit) {
    if edit.text().is_empty() {
        return;
    }
    match edits.last_mut() {
        Some(last) if last.same_kind(&edit) => last.text_mut().push_str(edit.text()),
        _ => edits.push(edit),
    }
}

/// Rebuild a located window by replaying `edits` (written against the
/// patch's source text) through `diffs` (source text -> window).
fn patch_window(window: &[char], diffs: &[Edit], edits: &[Edit]) -> Vec<char> {
    let mut out = Vec::with_capacity(window.len());
    let mut cursor = 0;
    let mut index1 = 0;

    for edit in edits {
        let len = edit.char_len();
        match edit {
            Edit::Equal(_) => index1 += len,
            Edit::Insert(s) => {
                let pos = x_index(diffs, index1).clamp(cursor, window.len());
                out.extend_from_slice(&window[cursor..pos]);
                out.extend(s.chars());
                cursor = pos;
            }
            Edit::Delete(_) => {
                let from = x_index(diffs, index1).clamp(cursor, window.len());
                let to = x_index(diffs, index1 + len).clamp(from, window.len());
                out.extend_from_slice(&window[cursor..from]);
                cursor = to;
                index1 += len;
            }
        }
    }
    out.extend_from_slice(&window[cursor..]);
    out
}

/// Map a position in the diff's old text to its new text.
fn x_index(diffs: &[Edit], loc: usize) -> usize {
    let (mut chars1, mut chars2) = (0, 0);
    let (mut last1, mut last2) = (0, 0);
    for edit in diffs {
        let len = edit.char_len();
        if !matches!(edit, Edit::Insert(_)) {
            chars1 += len;
        }
        if !matches!(edit, Edit::Delete(_)) {
            chars2 += len;
        }
        if chars1 > loc {
            if matches!(edit, Edit::Delete(_)) {
                return last2;
            }
            break;
        }
        last1 = chars1;
        last2 = chars2;
    }
    last2 + (loc - last1)
}

fn levenshtein(diffs: &[Edit]) -> usize {
    let (mut total, mut inserted, mut deleted) = (0, 0, 0);
    for edit in diffs {
        match edit {
            Edit::Insert(_) => inserted += edit.char_len(),
            Edit::Delete(_) => deleted += edit.char_len(),
            Edit::Equal(_) => {
                total += inserted.max(deleted);
                inserted = 0;
                deleted = 0;
            }
        }
    }
    total + inserted.max(deleted)
}

fn edit_distance(a: &[char], b: &[char]) -> usize {
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut diag = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == cb {
                diag
            } else {
                1 + diag.min(above).min(row[j])
            };
            diag = above;
        }
    }
    row[b.len()]
}

fn find_chars(text: &[char], pattern: &[char], from: usize) -> Option<usize> {
    if from > text.len() {
        return None;
    }
    if pattern.is_empty() {
        return Some(from);
    }
    text[from..]
        .windows(pattern.len())
        .position(|w| w == pattern)
        .map(|p| p + from)
}

fn rfind_chars(text: &[char], pattern: &[char]) -> Option<usize> {
    if pattern.is_empty() {
        return Some(text.len());
    }
    text.windows(pattern.len()).rposition(|w| w == pattern)
}
