//! Grammar for a single space-view reference token.
//!
//! ```text
//! token := "fork:" base [":ro"]           placeholder, not concrete
//!        | tip ["=" base] [":ro"]         tip may be "scratch"
//! tip   := space-id ["@" checkpoint]
//! ```
//!
//! `scratch` as a tip asks the space store for a fresh, unbacked view; as a
//! base it means "no base".

/// Sentinel reference that allocates a fresh view instead of resolving one.
pub const SCRATCH: &str = "scratch";
/// Prefix marking a view that still has to be forked into a concrete tip.
pub const FORK_PREFIX: &str = "fork:";
pub const READ_ONLY_SUFFIX: &str = ":ro";
/// Separator between members of a multi-valued (`spaces`) parameter.
pub const MULTI_SEPARATOR: char = ',';

const BASE_SEPARATOR: char = '=';
const CHECKPOINT_SEPARATOR: char = '@';

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpaceViewRequest {
    /// Empty for fork placeholders.
    pub space_id: String,
    pub base_ref: Option<String>,
    pub read_only: bool,
    pub checkpoint_existing_first: bool,
}

impl SpaceViewRequest {
    pub fn parse(token: &str, force_read_only: bool) -> Self {
        let (token, marked_read_only) = match token.strip_suffix(READ_ONLY_SUFFIX) {
            Some(stripped) => (stripped, true),
            None => (token, false),
        };
        let read_only = marked_read_only || force_read_only;

        if let Some(base) = token.strip_prefix(FORK_PREFIX) {
            return Self {
                space_id: String::new(),
                base_ref: base_ref(base),
                read_only,
                checkpoint_existing_first: false,
            };
        }

        let (tip, base) = match token.split_once(BASE_SEPARATOR) {
            Some((tip, base)) => (tip, base_ref(base)),
            None => (token, None),
        };

        // Writing into an existing tip checkpoints it first so the prior state stays addressable.
        let checkpoint_existing_first = !read_only && base.is_none() && tip != SCRATCH;

        Self {
            space_id: tip.to_string(),
            base_ref: base,
            read_only,
            checkpoint_existing_first,
        }
    }

    pub fn is_scratch(&self) -> bool {
        self.space_id == SCRATCH
    }

    pub fn is_concrete(&self) -> bool {
        !self.space_id.is_empty()
    }
}

fn base_ref(base: &str) -> Option<String> {
    if base.is_empty() || base == SCRATCH {
        None
    } else {
        Some(base.to_string())
    }
}

/// A raw view token is concrete iff it is non-empty and not a fork placeholder.
pub fn is_concrete_token(token: &str) -> bool {
    !token.is_empty() && !token.starts_with(FORK_PREFIX)
}

/// Space identifier portion of a tip or base reference.
pub fn space_id_of(reference: &str) -> &str {
    match reference.split_once(CHECKPOINT_SEPARATOR) {
        Some((id, _)) => id,
        None => reference,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_tip_is_writable_and_checkpointed() {
        let req = SpaceViewRequest::parse("sp-01", false);
        assert_eq!(req.space_id, "sp-01");
        assert_eq!(req.base_ref, None);
        assert!(!req.read_only);
        assert!(req.checkpoint_existing_first);
        assert!(req.is_concrete());
    }

    #[test]
    fn read_only_suffix_and_force_flag() {
        let marked = SpaceViewRequest::parse("sp-01:ro", false);
        assert_eq!(marked.space_id, "sp-01");
        assert!(marked.read_only);
        assert!(!marked.checkpoint_existing_first);

        let forced = SpaceViewRequest::parse("sp-01", true);
        assert!(forced.read_only);
    }

    #[test]
    fn fork_placeholder_is_not_concrete() {
        let req = SpaceViewRequest::parse("fork:sp-base", false);
        assert!(!req.is_concrete());
        assert_eq!(req.base_ref.as_deref(), Some("sp-base"));
        assert!(!is_concrete_token("fork:sp-base"));
        assert!(!is_concrete_token(""));
        assert!(is_concrete_token("sp-01:ro"));
    }

    #[test]
    fn tip_with_base_and_scratch() {
        let req = SpaceViewRequest::parse("sp-new=sp-old@3", false);
        assert_eq!(req.space_id, "sp-new");
        assert_eq!(req.base_ref.as_deref(), Some("sp-old@3"));
        assert!(!req.checkpoint_existing_first);

        let scratch = SpaceViewRequest::parse("scratch=scratch", false);
        assert!(scratch.is_scratch());
        assert_eq!(scratch.base_ref, None);
    }

    #[test]
    fn space_id_strips_checkpoint() {
        assert_eq!(space_id_of("sp-old@3"), "sp-old");
        assert_eq!(space_id_of("sp-old"), "sp-old");
    }
}
