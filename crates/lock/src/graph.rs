//! Wait-for graph cycle search

use std::collections::HashSet;
use travel_common::Xid;

/// Find a cycle through `start` in the wait-for graph described by `edges`.
///
/// Returns the transactions on the cycle, starting with `start`.
pub(crate) fn find_cycle<F>(start: Xid, edges: F) -> Option<Vec<Xid>>
where
    F: Fn(Xid) -> Vec<Xid>,
{
    let mut path = vec![start];
    let mut visited = HashSet::from([start]);

    if search(start, start, &edges, &mut path, &mut visited) {
        Some(path)
    } else {
        None
    }
}

fn search<F>(
    start: Xid,
    node: Xid,
    edges: &F,
    path: &mut Vec<Xid>,
    visited: &mut HashSet<Xid>,
) -> bool
where
    F: Fn(Xid) -> Vec<Xid>,
{
    for next in edges(node) {
        if next == start {
            return true;
        }
        if visited.insert(next) {
            path.push(next);
            if search(start, next, edges, path, visited) {
                return true;
            }
            path.pop();
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn graph(edges: &[(u64, u64)]) -> HashMap<Xid, Vec<Xid>> {
        let mut map: HashMap<Xid, Vec<Xid>> = HashMap::new();
        for (from, to) in edges {
            map.entry(Xid::new(*from)).or_default().push(Xid::new(*to));
        }
        map
    }

    #[test]
    fn test_two_cycle() {
        let g = graph(&[(1, 2), (2, 1)]);
        let cycle = find_cycle(Xid::new(1), |x| g.get(&x).cloned().unwrap_or_default()).unwrap();
        assert_eq!(cycle, vec![Xid::new(1), Xid::new(2)]);
    }

    #[test]
    fn test_chain_without_cycle() {
        let g = graph(&[(1, 2), (2, 3)]);
        assert!(find_cycle(Xid::new(1), |x| g.get(&x).cloned().unwrap_or_default()).is_none());
    }

    #[test]
    fn test_cycle_not_through_start() {
        // 1 waits on a cycle between 2 and 3 but is not part of it
        let g = graph(&[(1, 2), (2, 3), (3, 2)]);
        assert!(find_cycle(Xid::new(1), |x| g.get(&x).cloned().unwrap_or_default()).is_none());
    }

    #[test]
    fn test_longer_cycle() {
        let g = graph(&[(1, 2), (2, 4), (2, 3), (3, 1)]);
        let cycle = find_cycle(Xid::new(1), |x| g.get(&x).cloned().unwrap_or_default()).unwrap();
        assert_eq!(cycle, vec![Xid::new(1), Xid::new(2), Xid::new(3)]);
    }
}
