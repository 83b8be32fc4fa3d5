//! Triple pattern matching over the predicate indexes
//!
//! Each of the eight subject/predicate/object binding combinations walks
//! the index that serves it directly:
//!
//! | bound     | walk                                                         |
//! |-----------|--------------------------------------------------------------|
//! | s p o     | subject index, one list lookup                               |
//! | s p -     | subject index, one list                                      |
//! | - p o     | object index, one list                                       |
//! | s - o     | subject index, every predicate, anchor `s`, lookup `o`       |
//! | s - -     | subject index, every predicate, anchor `s`                   |
//! | - - o     | object index, every predicate, anchor `o`                    |
//! | - p -     | subject index, every anchor of `p`                           |
//! | - - -     | subject index, everything                                    |

use std::collections::{BTreeSet, HashMap};

use crate::error::{Result, StoreError};
use crate::store::index::{ObjectRef, RelatedResource, RelatedResourceList};
use crate::store::{IdTriple, ObjectPattern, Store, Triple, TriplePattern, PLAIN_LITERAL};

/// Graph restriction resolved to ids
enum GraphFilter {
    All,
    Only(BTreeSet<u64>),
}

impl GraphFilter {
    fn emit(&self, related: &RelatedResource, mut f: impl FnMut(u64)) {
        match self {
            GraphFilter::All => related.graph_ids.iter().for_each(|&g| f(g)),
            GraphFilter::Only(wanted) => related.graph_ids.intersection(wanted).for_each(|&g| f(g)),
        }
    }
}

/// Collects results for one anchor direction
struct Collector<'a> {
    filter: &'a GraphFilter,
    out: Vec<IdTriple>,
}

impl Collector<'_> {
    /// `anchor` is the subject when `subject_anchored`, else the object
    fn push(&mut self, predicate: u64, anchor: u64, related: &RelatedResource, subject_anchored: bool) {
        let (subject, object) = if subject_anchored {
            (anchor, related.rid)
        } else {
            (related.rid, anchor)
        };
        let out = &mut self.out;
        self.filter.emit(related, |graph| {
            out.push(IdTriple {
                subject,
                predicate,
                object,
                graph,
            })
        });
    }
}

impl Store {
    fn resolve_object(&self, object: &ObjectPattern) -> Result<Option<u64>> {
        match object {
            ObjectPattern::Uri(uri) => self.resolve_uri(uri),
            ObjectPattern::Literal {
                value,
                data_type,
                lang,
            } => self.resolve_literal(value, data_type.as_deref(), lang.as_deref()),
        }
    }

    /// Id-level matches, in the order of the index that served the pattern
    pub(crate) fn match_ids(&self, pattern: &TriplePattern) -> Result<Vec<IdTriple>> {
        let filter = match &pattern.graphs {
            None => GraphFilter::All,
            Some(uris) => {
                let ids: BTreeSet<u64> = uris.iter().filter_map(|uri| self.graphs.graph_id(uri)).collect();
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                GraphFilter::Only(ids)
            }
        };

        // A bound term that was never interned cannot match anything
        let subject = match &pattern.subject {
            Some(uri) => match self.resolve_uri(uri)? {
                Some(rid) => Some(rid),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        let predicate = match &pattern.predicate {
            Some(uri) => match self.resolve_uri(uri)? {
                Some(rid) => Some(rid),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        let object = match &pattern.object {
            Some(object) => match self.resolve_object(object)? {
                Some(rid) => Some(rid),
                None => return Ok(Vec::new()),
            },
            None => None,
        };

        let mut out = Collector {
            filter: &filter,
            out: Vec::new(),
        };
        match (subject, predicate, object) {
            (Some(s), Some(p), Some(o)) => {
                if let Some(list) = self.subjects.related_list(&self.arena, p, s)? {
                    if let Some(related) = list.lookup(&self.arena, o)? {
                        out.push(p, s, &related, true);
                    }
                }
            }
            (Some(s), Some(p), None) => {
                if let Some(list) = self.subjects.related_list(&self.arena, p, s)? {
                    self.walk_list(&list, p, s, true, &mut out)?;
                }
            }
            (None, Some(p), Some(o)) => {
                if let Some(list) = self.objects.related_list(&self.arena, p, o)? {
                    self.walk_list(&list, p, o, false, &mut out)?;
                }
            }
            (Some(s), None, Some(o)) => {
                for (p, anchors) in self.subjects.predicates(&self.arena)? {
                    if let Some(ObjectRef(list_id)) = anchors.lookup(&self.arena, s)? {
                        let list = RelatedResourceList::open(&self.arena, list_id)?;
                        if let Some(related) = list.lookup(&self.arena, o)? {
                            out.push(p, s, &related, true);
                        }
                    }
                }
            }
            (Some(s), None, None) => {
                for (p, anchors) in self.subjects.predicates(&self.arena)? {
                    if let Some(ObjectRef(list_id)) = anchors.lookup(&self.arena, s)? {
                        let list = RelatedResourceList::open(&self.arena, list_id)?;
                        self.walk_list(&list, p, s, true, &mut out)?;
                    }
                }
            }
            (None, None, Some(o)) => {
                for (p, anchors) in self.objects.predicates(&self.arena)? {
                    if let Some(ObjectRef(list_id)) = anchors.lookup(&self.arena, o)? {
                        let list = RelatedResourceList::open(&self.arena, list_id)?;
                        self.walk_list(&list, p, o, false, &mut out)?;
                    }
                }
            }
            (None, Some(p), None) => {
                if let Some(anchors) = self.subjects.anchor_tree(&self.arena, p)? {
                    for anchor in anchors.iter(&self.arena) {
                        let anchor = anchor?;
                        let list = RelatedResourceList::open(&self.arena, anchor.value.0)?;
                        self.walk_list(&list, p, anchor.key, true, &mut out)?;
                    }
                }
            }
            (None, None, None) => {
                self.subjects.visit(&self.arena, |p, s, related| {
                    out.push(p, s, related, true);
                    Ok(())
                })?;
            }
        }
        Ok(out.out)
    }

    fn walk_list(
        &self,
        list: &RelatedResourceList,
        predicate: u64,
        anchor: u64,
        subject_anchored: bool,
        out: &mut Collector<'_>,
    ) -> Result<()> {
        for entry in list.iter(&self.arena) {
            out.push(predicate, anchor, &entry?.value, subject_anchored);
        }
        Ok(())
    }

    /// Turn id-level results back into string triples
    pub(crate) fn materialize(&self, ids: &[IdTriple]) -> Result<Vec<Triple>> {
        let mut uris: HashMap<u64, String> = HashMap::new();
        let mut triples = Vec::with_capacity(ids.len());
        for t in ids {
            let subject = self.uri_of(t.subject, &mut uris)?;
            let predicate = self.uri_of(t.predicate, &mut uris)?;
            let graph = self
                .graphs
                .graph_uri(t.graph)
                .ok_or_else(|| StoreError::Internal(format!("unknown graph id {}", t.graph)))?
                .to_string();

            let object = self.lookup_resource(t.object)?;
            let triple = if object.is_literal {
                // untyped literals are stored as rdf:PlainLiteral and come back untyped
                let data_type = if object.data_type_rid == 0 {
                    None
                } else {
                    Some(self.uri_of(object.data_type_rid, &mut uris)?)
                        .filter(|uri| uri != PLAIN_LITERAL)
                };
                Triple {
                    subject,
                    predicate,
                    object: object.lexical_value,
                    is_literal: true,
                    data_type,
                    lang_code: object.language_code,
                    graph,
                }
            } else {
                Triple {
                    subject,
                    predicate,
                    object: self.prefixes.expand(&object.lexical_value).into_owned(),
                    is_literal: false,
                    data_type: None,
                    lang_code: None,
                    graph,
                }
            };
            triples.push(triple);
        }
        Ok(triples)
    }

    fn lookup_resource(&self, rid: u64) -> Result<crate::resource::Resource> {
        self.resources
            .resource(&self.arena, rid)?
            .ok_or_else(|| StoreError::Internal(format!("resource {:#x} is indexed but not interned", rid)))
    }

    fn uri_of(&self, rid: u64, cache: &mut HashMap<u64, String>) -> Result<String> {
        if let Some(uri) = cache.get(&rid) {
            return Ok(uri.clone());
        }
        let resource = self.lookup_resource(rid)?;
        let uri = self.prefixes.expand(&resource.lexical_value).into_owned();
        cache.insert(rid, uri.clone());
        Ok(uri)
    }
}
