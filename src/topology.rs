/// Fan-out of the collective spanning tree.
const FANOUT: usize = 2;

/// Position of one rank in the spanning tree rooted at `root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Neighbours {
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// Compute the parent and children of `rank` in the deterministic binary
/// tree over `size` ranks rooted at `root`.
///
/// Ranks are shifted so the root gets heap index 1; heap arithmetic then
/// gives parent `i / 2` and children `2i` and `2i + 1`, mapped back into
/// rank space.
pub(crate) fn neighbours(rank: usize, root: usize, size: usize) -> Neighbours {
    let index = (rank + size - root) % size + 1;

    let parent = if index == 1 {
        None
    } else {
        Some((index / FANOUT + root + size - 1) % size)
    };

    let mut children = Vec::with_capacity(FANOUT);
    for slot in 0..FANOUT {
        let child = index * FANOUT + slot;
        if child > size {
            continue;
        }
        children.push((child + root + size - 1) % size);
    }

    Neighbours { parent, children }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[test]
    fn single_rank_is_a_lone_root() {
        let links = neighbours(0, 0, 1);
        assert_eq!(links.parent, None);
        assert!(links.children.is_empty());
    }

    #[test]
    fn root_zero_gives_plain_heap_order() {
        assert_eq!(
            neighbours(0, 0, 7),
            Neighbours { parent: None, children: vec![1, 2] }
        );
        assert_eq!(
            neighbours(1, 0, 7),
            Neighbours { parent: Some(0), children: vec![3, 4] }
        );
        assert_eq!(
            neighbours(2, 0, 7),
            Neighbours { parent: Some(0), children: vec![5, 6] }
        );
        assert_eq!(
            neighbours(6, 0, 7),
            Neighbours { parent: Some(2), children: vec![] }
        );
    }

    #[test]
    fn shifted_root_keeps_the_same_shape() {
        assert_eq!(
            neighbours(2, 2, 4),
            Neighbours { parent: None, children: vec![3, 0] }
        );
        assert_eq!(
            neighbours(3, 2, 4),
            Neighbours { parent: Some(2), children: vec![1] }
        );
        assert_eq!(
            neighbours(0, 2, 4),
            Neighbours { parent: Some(2), children: vec![] }
        );
        assert_eq!(
            neighbours(1, 2, 4),
            Neighbours { parent: Some(3), children: vec![] }
        );
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(5)]
    #[case(8)]
    #[case(16)]
    fn parent_and_child_views_agree(#[case] size: usize) {
        for root in 0..size {
            let mut reached = 0;
            for rank in 0..size {
                let links = neighbours(rank, root, size);

                match links.parent {
                    None => assert_eq!(rank, root),
                    Some(parent) => {
                        assert!(neighbours(parent, root, size).children.contains(&rank));
                        reached += 1;
                    }
                }
                for &child in &links.children {
                    assert_eq!(neighbours(child, root, size).parent, Some(rank));
                }
            }
            // every rank except the root hangs off the tree exactly once
            assert_eq!(reached, size - 1);
        }
    }
}
