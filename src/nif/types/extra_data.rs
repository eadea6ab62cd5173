use super::animation::TextKey;
use std::fmt::Debug;
use std::ops::Deref;

/// Ordered text keys of a sequence (the NiTextKeyExtraData payload).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextKeyList {
    keys: Vec<TextKey>,
}

impl TextKeyList {
    pub fn new(mut keys: Vec<TextKey>) -> Self {
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self { keys }
    }

    /// Inserts keeping time order; equal times keep insertion order.
    pub fn insert(&mut self, key: TextKey) {
        let index = self.keys.partition_point(|k| k.time <= key.time);
        self.keys.insert(index, key);
    }

    /// Time of the first key whose text matches `name` (case-insensitive, any line).
    pub fn find_time(&self, name: &str) -> Option<f32> {
        self.keys
            .iter()
            .find(|key| key.value.lines().any(|line| line.trim().eq_ignore_ascii_case(name)))
            .map(|key| key.time)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find_time(name).is_some()
    }

    /// `(tag, time)` for every `morph:` key, in time order.
    pub fn morph_keys(&self) -> Vec<(String, f32)> {
        let mut morphs = Vec::new();
        for key in &self.keys {
            for line in key.value.lines() {
                let line = line.trim();
                let Some(prefix) = line.get(..6) else {
                    continue;
                };
                if prefix.eq_ignore_ascii_case("morph:") && line.len() > 6 {
                    morphs.push((line[6..].trim().to_lowercase(), key.time));
                }
            }
        }
        morphs
    }

    /// Keys with `from < time <= to`; with `inclusive_start` also `time == from`.
    pub fn keys_in_range(&self, from: f32, to: f32, inclusive_start: bool) -> impl Iterator<Item = &TextKey> {
        self.keys.iter().filter(move |key| {
            let after_start = if inclusive_start { key.time >= from } else { key.time > from };
            after_start && key.time <= to
        })
    }
}

impl Deref for TextKeyList {
    type Target = [TextKey];
    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.keys
    }
}
