//! REFERENCES: pick two distinct articles to write from.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::pipeline::{ReferencePair, StageError, Task};
use crate::services::MaterialItem;

pub(super) fn select(task: &Task) -> Result<ReferencePair, StageError> {
    let materials = task.outputs.require_materials()?;
    let mut rng = rand::thread_rng();
    pick_pair(&materials.items, &mut rng).ok_or_else(|| {
        StageError::DataInsufficiency(format!(
            "need 2 reference articles for {:?}, found {}",
            materials.keyword,
            materials.items.len()
        ))
    })
}

/// Pick two distinct items at random. `None` when fewer than two exist.
pub fn pick_pair<R: Rng + ?Sized>(items: &[MaterialItem], rng: &mut R) -> Option<ReferencePair> {
    let mut picked = items.choose_multiple(rng, 2).cloned();
    let first = picked.next()?;
    let second = picked.next()?;
    Some(ReferencePair { first, second })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::pipeline::{ErrorKind, MaterialSet, Stage};
    use crate::testing::fixtures;

    #[test]
    fn test_pick_pair_is_distinct() {
        let items = fixtures::materials("beach", 5);
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let pair = pick_pair(&items, &mut rng).unwrap();
            assert_ne!(pair.first.id, pair.second.id);
        }
    }

    #[test]
    fn test_pick_pair_needs_two() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(pick_pair(&fixtures::materials("beach", 1), &mut rng).is_none());
        assert!(pick_pair(&[], &mut rng).is_none());

        let pair = pick_pair(&fixtures::materials("beach", 2), &mut rng).unwrap();
        let mut ids = [pair.first.id, pair.second.id];
        ids.sort();
        assert_eq!(ids, [1, 2]);
    }

    #[test]
    fn test_select_with_single_material_fails() {
        let mut task = Task::new("batch", 0, fixtures::persona("p-1", &["travel"]));
        task.stage = Stage::References;
        task.outputs.materials = Some(MaterialSet {
            keyword: "beach".into(),
            items: fixtures::materials("beach", 1),
            crawl: None,
        });

        let err = select(&task).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataInsufficiency);
        assert!(err.to_string().contains("found 1"));
    }
}
