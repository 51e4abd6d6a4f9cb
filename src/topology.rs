//! Cartesian process topology and the spanning tree embedded in it.
//!
//! Ranks are laid out on a `x * y * z` array with `x` varying fastest. The
//! spanning tree is built one axis at a time by recursive bisection of each
//! line of the array: every sub-range is rooted at its first element, and
//! the element at the split point of a range becomes a direct child of the
//! range root. Lines along `x` cover every row, lines along `y` only the
//! `x == 0` column of each plane, and the single line along `z` only the
//! `x == y == 0` corner, so each rank ends up with at most one parent and
//! rank 0 is the root of the whole group.

/// Extent of the process array along each axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dims {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

/// Position of a rank in the process array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Coord {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

/// One of the three array axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Dims {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// Factor a process count into the most cubic array, with
    /// `x >= y >= z`: 8 -> (2, 2, 2), 12 -> (3, 2, 2), 7 -> (7, 1, 1).
    pub fn factor(procs: usize) -> Self {
        let z = largest_divisor_with(procs, |d| d * d * d <= procs);
        let rest = procs / z.max(1);
        let y = largest_divisor_with(rest, |d| d * d <= rest);
        Self::new(rest / y.max(1), y, z)
    }

    /// Total number of processes in the array.
    pub fn product(&self) -> usize {
        self.x * self.y * self.z
    }

    pub fn extent(&self, axis: Axis) -> usize {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    pub fn coord(&self, rank: usize) -> Coord {
        Coord {
            x: rank % self.x,
            y: (rank / self.x) % self.y,
            z: rank / (self.x * self.y),
        }
    }

    pub fn rank(&self, coord: Coord) -> usize {
        coord.x + self.x * (coord.y + self.y * coord.z)
    }
}

impl Coord {
    fn get(&self, axis: Axis) -> usize {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    fn with(mut self, axis: Axis, value: usize) -> Self {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
        }
        self
    }
}

fn largest_divisor_with<F: Fn(usize) -> bool>(n: usize, accept: F) -> usize {
    (1..=n)
        .take_while(|&d| accept(d))
        .filter(|d| n % d == 0)
        .last()
        .unwrap_or(1)
}

/// Tree edges of one position on a line, in line positions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LineEdges {
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// Compute the tree edges of position `pos` on a line of length `len`
/// rooted at position 0.
pub fn line_edges(len: usize, pos: usize) -> LineEdges {
    let mut edges = LineEdges::default();
    descend(0, len, pos, &mut edges);
    edges
}

fn descend(start: usize, len: usize, pos: usize, edges: &mut LineEdges) {
    match len {
        0 | 1 => {}
        2 | 3 => {
            if pos == start {
                edges.children.extend(start + 1..start + len)
            } else {
                edges.parent = Some(start)
            }
        }
        _ => {
            // The lower half is the smaller one for odd lengths.
            let mid = start + len / 2;
            if pos == start {
                edges.children.push(mid)
            } else if pos == mid {
                edges.parent = Some(start)
            }
            if pos < mid {
                descend(start, mid - start, pos, edges)
            } else {
                descend(mid, start + len - mid, pos, edges)
            }
        }
    }
}

/// The tree edges of a single rank.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tree {
    /// The parent rank, or `None` at the root.
    pub uptree: Option<usize>,
    /// Child ranks: `x` children first, then `y`, then `z`.
    pub downtree: Vec<usize>,
}

/// Build the tree edges of `rank` within the array `dims`.
pub fn build_tree(dims: Dims, rank: usize) -> Tree {
    let coord = dims.coord(rank);
    let mut tree = Tree::default();

    for axis in [Axis::X, Axis::Y, Axis::Z] {
        let on_line = match axis {
            Axis::X => true,
            Axis::Y => coord.x == 0,
            Axis::Z => coord.x == 0 && coord.y == 0,
        };
        if !on_line {
            break;
        }
        let edges = line_edges(dims.extent(axis), coord.get(axis));
        let to_rank = |pos| dims.rank(coord.with(axis, pos));

        if tree.uptree.is_none() {
            tree.uptree = edges.parent.map(to_rank);
        }
        tree.downtree.extend(edges.children.into_iter().map(to_rank));
    }
    tree
}

/// Number of ranks in the subtree rooted at `rank`, itself included.
pub fn subtree_size(dims: Dims, rank: usize) -> usize {
    1 + build_tree(dims, rank)
        .downtree
        .into_iter()
        .map(|child| subtree_size(dims, child))
        .sum::<usize>()
}

/// Everything one process knows about its place in the group. Read-only
/// once the group has been initialized.
#[derive(Clone, Debug)]
pub struct Topology {
    pub(crate) rank: usize,
    pub(crate) dims: Dims,
    pub(crate) coord: Coord,
    pub(crate) tree: Tree,
    pub(crate) slvcnt: Vec<usize>,
}

impl Topology {
    /// Compute the coordinate and tree edges of `rank`. Subtree sizes are
    /// left empty until they are reduced over the live tree.
    pub fn new(dims: Dims, rank: usize) -> Self {
        Self {
            rank,
            dims,
            coord: dims.coord(rank),
            tree: build_tree(dims, rank),
            slvcnt: Vec::new(),
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    pub fn coord(&self) -> Coord {
        self.coord
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Number of downtree edges.
    pub fn degree(&self) -> usize {
        self.tree.downtree.len()
    }

    /// Subtree size of each downtree peer, in `downtree` order.
    pub fn slvcnt(&self) -> &[usize] {
        &self.slvcnt
    }

    /// Rank of the nearest neighbor `offset` steps (normally +1 or -1) away
    /// along `axis`, or `None` past the array boundary.
    pub fn neighbor(&self, axis: Axis, offset: isize) -> Option<usize> {
        let position = self.coord.get(axis) as isize + offset;
        if position < 0 || position >= self.dims.extent(axis) as isize {
            None
        } else {
            Some(self.dims.rank(self.coord.with(axis, position as usize)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn all_trees(dims: Dims) -> Vec<Tree> {
        (0..dims.product()).map(|r| build_tree(dims, r)).collect()
    }

    #[test]
    fn line_of_four_splits_at_two() {
        assert_eq!(line_edges(4, 0).children, vec![2, 1]);
        assert_eq!(line_edges(4, 1).parent, Some(0));
        assert_eq!(line_edges(4, 2).parent, Some(0));
        assert_eq!(line_edges(4, 2).children, vec![3]);
        assert_eq!(line_edges(4, 3).parent, Some(2));
    }

    #[test]
    fn short_lines_hang_off_the_first_element() {
        assert_eq!(line_edges(1, 0), LineEdges::default());
        assert_eq!(line_edges(2, 0).children, vec![1]);
        assert_eq!(line_edges(3, 0).children, vec![1, 2]);
        assert_eq!(line_edges(3, 2).parent, Some(0));
    }

    #[test]
    fn odd_lines_make_the_lower_half_smaller() {
        // 5 = 2 + 3: position 2 heads the upper half of three.
        assert_eq!(line_edges(5, 0).children, vec![2, 1]);
        assert_eq!(line_edges(5, 2).children, vec![3, 4]);
        assert_eq!(line_edges(5, 4).parent, Some(2));
    }

    #[test]
    fn factor_is_most_cubic() {
        assert_eq!(Dims::factor(8), Dims::new(2, 2, 2));
        assert_eq!(Dims::factor(12), Dims::new(3, 2, 2));
        assert_eq!(Dims::factor(7), Dims::new(7, 1, 1));
        assert_eq!(Dims::factor(1), Dims::new(1, 1, 1));
        assert_eq!(Dims::factor(64), Dims::new(4, 4, 4));
    }

    #[test]
    fn coords_round_trip_through_rank() {
        let dims = Dims::new(3, 4, 5);
        for rank in 0..dims.product() {
            assert_eq!(dims.rank(dims.coord(rank)), rank);
        }
        assert_eq!(dims.coord(1), Coord { x: 1, y: 0, z: 0 });
        assert_eq!(dims.coord(3), Coord { x: 0, y: 1, z: 0 });
        assert_eq!(dims.coord(12), Coord { x: 0, y: 0, z: 1 });
    }

    #[test]
    fn cube_of_eight() {
        let dims = Dims::new(2, 2, 2);
        let trees = all_trees(dims);

        assert_eq!(trees[0].uptree, None);
        assert_eq!(trees[0].downtree, vec![1, 2, 4]);
        assert_eq!(trees[1].uptree, Some(0));
        assert_eq!(trees[2].uptree, Some(0));
        assert_eq!(trees[3].uptree, Some(2));
        assert_eq!(trees[4].uptree, Some(0));
        assert_eq!(trees[6].uptree, Some(4));
        assert_eq!(trees[7].uptree, Some(6));

        let mut children: Vec<_> = trees.iter().flat_map(|t| t.downtree.clone()).collect();
        children.sort_unstable();
        assert_eq!(children, (1..8).collect::<Vec<_>>());
        assert_eq!(subtree_size(dims, 0), 8);
        assert_eq!(subtree_size(dims, 4), 4);
    }

    #[test]
    fn neighbors_stop_at_the_boundary() {
        let topo = Topology::new(Dims::new(2, 2, 2), 0);
        assert_eq!(topo.neighbor(Axis::X, 1), Some(1));
        assert_eq!(topo.neighbor(Axis::Y, 1), Some(2));
        assert_eq!(topo.neighbor(Axis::Z, 1), Some(4));
        assert_eq!(topo.neighbor(Axis::X, -1), None);
        assert_eq!(topo.neighbor(Axis::Z, 2), None);
    }

    proptest! {
        #[test]
        fn tree_spans_the_group(x in 1usize..7, y in 1usize..7, z in 1usize..7) {
            let dims = Dims::new(x, y, z);
            let procs = dims.product();
            let trees = all_trees(dims);

            let roots = trees.iter().filter(|t| t.uptree.is_none()).count();
            let edges: usize = trees.iter().map(|t| t.downtree.len()).sum();
            prop_assert_eq!(roots, 1);
            prop_assert!(trees[0].uptree.is_none());
            prop_assert_eq!(edges, procs - 1);

            // Parent and child edges agree, and every rank reaches the root.
            for (rank, tree) in trees.iter().enumerate() {
                for &child in &tree.downtree {
                    prop_assert_eq!(trees[child].uptree, Some(rank));
                }
                let mut cursor = rank;
                let mut hops = 0;
                while let Some(parent) = trees[cursor].uptree {
                    cursor = parent;
                    hops += 1;
                    prop_assert!(hops < procs);
                }
                prop_assert_eq!(cursor, 0);
            }
            prop_assert_eq!(subtree_size(dims, 0), procs);
        }
    }
}
