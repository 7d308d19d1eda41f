//! Parent selection: pick the snapshot to diff against.
//!
//! Порядок:
//! 1) explicit parent: используется как есть, без поиска;
//! 2) нет clone sources: full export (None);
//! 3) recorded ancestor target'а уже среди clone sources: берём его;
//! 4) иначе ищем sibling (тот же ancestor) среди clone sources с минимальной
//!    |ctransid(sibling) - ctransid(ancestor)|; при равенстве: первый по порядку вставки.
//!
//! Линейный проход по clone sources на каждый target; индекс не нужен.

use log::debug;

use crate::clone_sources::CloneSourceSet;
use crate::error::ExportError;
use crate::record::SnapshotRecord;
use crate::registry::SnapshotRegistry;

/// Outcome of parent selection, with the reason it was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentChoice {
    /// Full (non-incremental) export.
    Full,
    Explicit(u64),
    /// Recorded ancestor is already a clone source.
    Ancestor(u64),
    /// Sibling sharing the ancestor, `distance` = ctransid gap to the ancestor.
    Sibling { root_id: u64, distance: u64 },
}

impl ParentChoice {
    pub fn root_id(&self) -> Option<u64> {
        match *self {
            ParentChoice::Full => None,
            ParentChoice::Explicit(id) | ParentChoice::Ancestor(id) => Some(id),
            ParentChoice::Sibling { root_id, .. } => Some(root_id),
        }
    }
}

/// Export parent root id for `target`, or None for a full export.
pub fn select_parent(
    registry: &dyn SnapshotRegistry,
    target: &SnapshotRecord,
    explicit_parent: Option<u64>,
    clone_sources: &CloneSourceSet,
) -> Result<Option<u64>, ExportError> {
    choose_parent(registry, target, explicit_parent, clone_sources).map(|c| c.root_id())
}

/// Same as [`select_parent`] but keeps the reason.
pub fn choose_parent(
    registry: &dyn SnapshotRegistry,
    target: &SnapshotRecord,
    explicit_parent: Option<u64>,
    clone_sources: &CloneSourceSet,
) -> Result<ParentChoice, ExportError> {
    if let Some(id) = explicit_parent {
        return Ok(ParentChoice::Explicit(id));
    }
    if clone_sources.is_empty() {
        return Ok(ParentChoice::Full);
    }

    let no_parent = || ExportError::NoSuitableParent {
        root_id: target.root_id,
    };

    let ancestor = target
        .ancestor_uuid()
        .and_then(|u| registry.resolve_by_uuid(&u))
        .ok_or_else(no_parent)?;

    if clone_sources.contains(ancestor.root_id) {
        debug!(
            "parent: root {} -> ancestor {} is a clone source",
            target.root_id, ancestor.root_id
        );
        return Ok(ParentChoice::Ancestor(ancestor.root_id));
    }

    let mut best: Option<(u64, u64)> = None; // (root_id, distance)
    for cs in clone_sources {
        if cs == target.root_id {
            continue;
        }
        let sibling = match registry.resolve_by_root_id(cs) {
            Some(r) => r,
            None => continue,
        };
        let shares_ancestor = sibling
            .ancestor_uuid()
            .and_then(|u| registry.resolve_by_uuid(&u))
            .map(|a| a.root_id == ancestor.root_id)
            .unwrap_or(false);
        if !shares_ancestor {
            continue;
        }

        let distance = sibling.ctransid.abs_diff(ancestor.ctransid);
        // строго меньше: при равенстве остаётся первый встреченный
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((cs, distance));
        }
    }

    match best {
        Some((root_id, distance)) => {
            debug!(
                "parent: root {} -> sibling {} (ancestor {}, distance {})",
                target.root_id, root_id, ancestor.root_id, distance
            );
            Ok(ParentChoice::Sibling { root_id, distance })
        }
        None => Err(no_parent()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemRegistry;
    use uuid::Uuid;

    struct Fixture {
        reg: MemRegistry,
        ancestor: SnapshotRecord,
    }

    impl Fixture {
        fn new(ancestor_ctransid: u64) -> Self {
            let mut reg = MemRegistry::new();
            let ancestor =
                SnapshotRecord::new(256, Uuid::new_v4(), Uuid::nil(), ancestor_ctransid, "vol", true);
            reg.insert(ancestor.clone());
            Self { reg, ancestor }
        }

        fn child(&mut self, root_id: u64, ctransid: u64) -> SnapshotRecord {
            let r = SnapshotRecord::new(
                root_id,
                Uuid::new_v4(),
                self.ancestor.uuid,
                ctransid,
                format!("snaps/{root_id}"),
                true,
            );
            self.reg.insert(r.clone());
            r
        }
    }

    fn set(ids: &[u64]) -> CloneSourceSet {
        let mut s = CloneSourceSet::new();
        for &id in ids {
            s.add(id).unwrap();
        }
        s
    }

    #[test]
    fn no_ancestor_and_no_clone_sources_is_full() {
        let f = Fixture::new(100);
        let got = select_parent(&f.reg, &f.ancestor, None, &CloneSourceSet::new()).unwrap();
        assert_eq!(got, None);
    }

    #[test]
    fn explicit_parent_wins_without_search() {
        let mut f = Fixture::new(100);
        let target = f.child(300, 120);
        // 999 нет в registry: поиск не выполняется, ошибки нет
        let got = choose_parent(&f.reg, &target, Some(999), &set(&[256])).unwrap();
        assert_eq!(got, ParentChoice::Explicit(999));
    }

    #[test]
    fn ancestor_in_clone_sources_short_circuits() {
        let mut f = Fixture::new(100);
        let target = f.child(300, 120);
        let close = f.child(301, 100);
        let got = choose_parent(&f.reg, &target, None, &set(&[close.root_id, 256])).unwrap();
        assert_eq!(got, ParentChoice::Ancestor(256));
    }

    #[test]
    fn closest_sibling_by_ctransid() {
        let mut f = Fixture::new(100);
        let target = f.child(300, 200);
        let s90 = f.child(310, 90);
        let s150 = f.child(311, 150);
        let s101 = f.child(312, 101);
        let cs = set(&[s90.root_id, s150.root_id, s101.root_id]);
        let got = choose_parent(&f.reg, &target, None, &cs).unwrap();
        assert_eq!(
            got,
            ParentChoice::Sibling {
                root_id: 312,
                distance: 1
            }
        );
    }

    #[test]
    fn tie_goes_to_first_inserted() {
        let mut f = Fixture::new(100);
        let target = f.child(300, 200);
        let above = f.child(320, 105);
        let below = f.child(321, 95);

        let got = select_parent(&f.reg, &target, None, &set(&[above.root_id, below.root_id]));
        assert_eq!(got.unwrap(), Some(320));
        let got = select_parent(&f.reg, &target, None, &set(&[below.root_id, above.root_id]));
        assert_eq!(got.unwrap(), Some(321));
    }

    #[test]
    fn unrelated_clone_sources_fail() {
        let mut f = Fixture::new(100);
        let target = f.child(300, 200);

        let other_root = SnapshotRecord::new(400, Uuid::new_v4(), Uuid::nil(), 5, "other", true);
        let other_child =
            SnapshotRecord::new(401, Uuid::new_v4(), other_root.uuid, 6, "other/snap", true);
        f.reg.insert(other_root);
        f.reg.insert(other_child);

        let err = select_parent(&f.reg, &target, None, &set(&[401, 400])).unwrap_err();
        assert!(matches!(err, ExportError::NoSuitableParent { root_id: 300 }));
    }

    #[test]
    fn missing_ancestor_fails_when_searching() {
        let f = Fixture::new(100);
        // у ancestor'а самого нет предка
        let err = select_parent(&f.reg, &f.ancestor, None, &set(&[256])).unwrap_err();
        assert!(matches!(err, ExportError::NoSuitableParent { root_id: 256 }));
    }

    #[test]
    fn target_is_not_its_own_sibling() {
        let mut f = Fixture::new(100);
        let target = f.child(300, 100);
        let err = select_parent(&f.reg, &target, None, &set(&[300])).unwrap_err();
        assert!(matches!(err, ExportError::NoSuitableParent { .. }));
    }
}
