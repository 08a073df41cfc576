//! Retrieval collaborators: continuation-chain fetching and recursive
//! relationship resolution
//!
//! The core produces keys; a host-provided [CubeRetriever] maps them back
//! to cubes. [fetch_veritum] walks a continuation chain into a recombined
//! [Veritum]; [resolve_relationships] walks the whole reference graph of
//! a [Veritable] with a depth limit, a flat visited set and per-type
//! filtering, reporting an observable result state.

use std::collections::{HashMap, HashSet, VecDeque};

use cube::definitions::fields::Field;
use cube::definitions::params::FieldType;
use cube::entity::Cube;
use cube::keys::CubeKey;
use cube::relationship::Relationship;
use cube::RelationshipType;
use log::{debug, warn};

use crate::errors::{ChainError, VeritumError};
use crate::veritum::Veritum;

/// Asynchronous lookup of cubes by key, provided by the host
#[allow(async_fn_in_trait)]
pub trait CubeRetriever {
    /// Fetch the cube stored under `key`, if any
    async fn retrieve(&self, key: &CubeKey) -> Option<Cube>;
}

/// The capability set shared by single cubes and veritums
pub trait Veritable {
    /// The key, if compiled
    fn veritable_key(&self) -> Option<CubeKey>;

    /// The key in hex text form, if compiled
    fn veritable_key_hex(&self) -> Option<String> {
        self.veritable_key().map(|k| k.to_hex())
    }

    /// The relationships, optionally restricted to one type
    fn veritable_relationships(&self, filter: Option<RelationshipType>) -> Vec<Relationship>;

    /// The fields, optionally restricted to one type
    fn veritable_fields(&self, filter: Option<FieldType>) -> Vec<&Field>;
}

impl Veritable for Cube {
    fn veritable_key(&self) -> Option<CubeKey> {
        self.key()
    }

    fn veritable_relationships(&self, filter: Option<RelationshipType>) -> Vec<Relationship> {
        self.relationships(filter)
    }

    fn veritable_fields(&self, filter: Option<FieldType>) -> Vec<&Field> {
        self.fields()
            .iter()
            .filter(|f| filter.map_or(true, |ft| f.field_type == ft))
            .collect()
    }
}

impl Veritable for Veritum {
    fn veritable_key(&self) -> Option<CubeKey> {
        self.key()
    }

    fn veritable_relationships(&self, filter: Option<RelationshipType>) -> Vec<Relationship> {
        self.relationships(filter)
    }

    fn veritable_fields(&self, filter: Option<FieldType>) -> Vec<&Field> {
        self.fields()
            .iter()
            .filter(|f| filter.map_or(true, |ft| f.field_type == ft))
            .collect()
    }
}

/// Fetch a whole veritum by its first chunk's key
///
/// Follows the continuation relationships, collecting chunks in chain
/// order, then recombines them. A missing chunk or a looping chain is a
/// [ChainError].
pub async fn fetch_veritum<R: CubeRetriever>(
    first: &CubeKey,
    retriever: &R,
) -> Result<Veritum, VeritumError> {
    let mut chunks: Vec<Cube> = Vec::new();
    let mut seen: HashSet<CubeKey> = HashSet::new();
    let mut next = Some(*first);
    while let Some(key) = next {
        if !seen.insert(key) {
            return Err(ChainError::Cycle { key }.into());
        }
        let chunk = retriever
            .retrieve(&key)
            .await
            .ok_or(ChainError::MissingChunk { key })?;
        next = chunk.continuation();
        chunks.push(chunk);
    }
    Veritum::from_chunks(chunks)
}

/// Options of a recursive relationship resolution
pub struct ResolveOptions {
    /// Maximum recursion depth
    pub depth: usize,
    /// Only follow these relationship types; `None` follows all
    pub relationship_types: Option<Vec<RelationshipType>>,
    /// Keys that must not be resolved; hitting one is recorded as an
    /// applied exclusion
    pub exclude: HashSet<CubeKey>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            depth: 10,
            relationship_types: None,
            exclude: HashSet::new(),
        }
    }
}

/// Terminal state of a resolution
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResolutionState {
    /// Resolution has not finished
    Pending,
    /// Every branch resolved
    Success,
    /// At least one referenced cube could not be retrieved
    PartialFailure,
    /// Branches were cut off at the depth limit
    DepthLimited,
    /// Branches were cut off by the exclusion set
    ExcludedEncountered,
}

/// One resolved (or failed) reference
#[derive(Debug)]
pub struct ResolvedCube {
    /// The relationship that led here
    pub relationship: Relationship,
    /// Recursion depth at which the reference was found, starting at 1
    pub depth: usize,
    /// The retrieved cube, or `None` on retrieval failure
    pub cube: Option<Cube>,
}

/// Result of a recursive relationship resolution
#[derive(Debug)]
pub struct Resolution {
    /// Every reference encountered, in traversal order
    pub related: Vec<ResolvedCube>,
    /// The terminal state of the walk
    pub state: ResolutionState,
    /// Whether the exclusion set cut anything off (advisory)
    pub exclusion_applied: bool,
    /// Whether the depth limit cut anything off (advisory)
    pub depth_limit_reached: bool,
}

impl Resolution {
    /// Whether the walk has finished
    pub fn is_done(&self) -> bool {
        self.state != ResolutionState::Pending
    }

    /// Whether every branch resolved successfully
    pub fn all_resolved(&self) -> bool {
        self.state == ResolutionState::Success
    }

    /// Whether any retrieval failed
    pub fn resolution_failure(&self) -> bool {
        self.state == ResolutionState::PartialFailure
    }

    /// The resolved references grouped by relationship type
    pub fn by_type(&self) -> HashMap<RelationshipType, Vec<&ResolvedCube>> {
        let mut map: HashMap<RelationshipType, Vec<&ResolvedCube>> = HashMap::new();
        for resolved in &self.related {
            map.entry(resolved.relationship.rel_type)
                .or_default()
                .push(resolved);
        }
        map
    }
}

/// Recursively resolve every cube a veritable references
///
/// Walks the reference graph breadth-first with a shared visited set to
/// break cycles. Continuation relationships are chain plumbing and are
/// never followed here.
pub async fn resolve_relationships<V: Veritable, R: CubeRetriever>(
    main: &V,
    retriever: &R,
    opts: &ResolveOptions,
) -> Resolution {
    let mut visited: HashSet<CubeKey> = HashSet::new();
    if let Some(key) = main.veritable_key() {
        visited.insert(key);
    }

    let follows = |rel: &Relationship| -> bool {
        rel.rel_type != RelationshipType::ContinuedIn
            && opts
                .relationship_types
                .as_ref()
                .map_or(true, |types| types.contains(&rel.rel_type))
    };

    let mut queue: VecDeque<(Relationship, usize)> = main
        .veritable_relationships(None)
        .into_iter()
        .filter(|r| follows(r))
        .map(|r| (r, 1))
        .collect();

    let mut related: Vec<ResolvedCube> = Vec::new();
    let mut failed = false;
    let mut exclusion_applied = false;
    let mut depth_limit_reached = false;

    while let Some((relationship, depth)) = queue.pop_front() {
        if !visited.insert(relationship.remote_key) {
            continue;
        }
        if opts.exclude.contains(&relationship.remote_key) {
            debug!("Exclusion set cut off {}", relationship.remote_key);
            exclusion_applied = true;
            continue;
        }
        if depth > opts.depth {
            depth_limit_reached = true;
            continue;
        }

        let cube = retriever.retrieve(&relationship.remote_key).await;
        match &cube {
            Some(cube) => {
                for next in cube.relationships(None).into_iter().filter(|r| follows(r)) {
                    if !visited.contains(&next.remote_key) {
                        queue.push_back((next, depth + 1));
                    }
                }
            }
            None => {
                warn!("Could not resolve {}", relationship.remote_key);
                failed = true;
            }
        }
        related.push(ResolvedCube {
            relationship,
            depth,
            cube,
        });
    }

    let state = if failed {
        ResolutionState::PartialFailure
    } else if depth_limit_reached {
        ResolutionState::DepthLimited
    } else if exclusion_applied {
        ResolutionState::ExcludedEncountered
    } else {
        ResolutionState::Success
    };
    Resolution {
        related,
        state,
        exclusion_applied,
        depth_limit_reached,
    }
}
