use crate::geom::{axis_deviation, dominant_axis_angle, rotate_back};
use crate::params::GridGraphParams;
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::{Point2, Vector2};
use std::collections::{HashSet, VecDeque};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NeighborDirection {
    Right,
    Left,
    Up,
    Down,
}

impl NeighborDirection {
    pub fn opposite(self) -> Self {
        match self {
            NeighborDirection::Right => NeighborDirection::Left,
            NeighborDirection::Left => NeighborDirection::Right,
            NeighborDirection::Up => NeighborDirection::Down,
            NeighborDirection::Down => NeighborDirection::Up,
        }
    }

    /// Grid step `(di, dj)` taken when following this edge.
    pub fn offset(self) -> (i32, i32) {
        match self {
            NeighborDirection::Right => (1, 0),
            NeighborDirection::Left => (-1, 0),
            NeighborDirection::Up => (0, -1),
            NeighborDirection::Down => (0, 1),
        }
    }

    fn slot(self) -> usize {
        match self {
            NeighborDirection::Right => 0,
            NeighborDirection::Left => 1,
            NeighborDirection::Up => 2,
            NeighborDirection::Down => 3,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NodeNeighbor {
    pub direction: NeighborDirection,
    pub index: usize,
    pub distance: f32,
    pub score: f32,
}

/// 4-connected neighbour graph over corner candidates.
pub struct GridGraph {
    /// For each node, at most one neighbour per direction.
    pub neighbors: Vec<Vec<NodeNeighbor>>,
    /// Median nearest-neighbour distance (pixels).
    pub spacing: f32,
    /// Grid axis angle the directions are measured against.
    pub axis_angle: f32,
}

fn direction_quadrant(v: &Vector2<f32>) -> NeighborDirection {
    if v.x.abs() > v.y.abs() {
        if v.x >= 0.0 {
            NeighborDirection::Right
        } else {
            NeighborDirection::Left
        }
    } else if v.y >= 0.0 {
        NeighborDirection::Down
    } else {
        NeighborDirection::Up
    }
}

/// Keep at most one neighbour per direction, choosing the lowest-score candidate.
fn select_neighbors(candidates: Vec<NodeNeighbor>) -> Vec<NodeNeighbor> {
    let mut best: [Option<NodeNeighbor>; 4] = [None, None, None, None];

    for candidate in candidates {
        let slot = &mut best[candidate.direction.slot()];
        let replace = match slot {
            None => true,
            Some(current) => {
                candidate.score < current.score
                    || (candidate.score == current.score && candidate.distance < current.distance)
            }
        };
        if replace {
            *slot = Some(candidate);
        }
    }

    best.into_iter().flatten().collect()
}

fn median(mut values: Vec<f32>) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f32::total_cmp);
    Some(values[values.len() / 2])
}

impl GridGraph {
    /// Build the graph. `None` when there are too few points to estimate a
    /// spacing or a grid axis.
    pub fn new(points: &[Point2<f32>], params: &GridGraphParams) -> Option<Self> {
        if points.len() < 2 {
            return None;
        }

        let coords: Vec<[f32; 2]> = points.iter().map(|p| [p.x, p.y]).collect();
        let tree: KdTree<f32, 2> = (&coords).into();

        // Raw k-NN lists, self excluded.
        let k = params.k_neighbors.max(1) + 1;
        let mut knn: Vec<Vec<(usize, Vector2<f32>, f32)>> = Vec::with_capacity(points.len());
        for (i, p) in points.iter().enumerate() {
            let Ok(qty) = k.try_into() else {
                return None;
            };
            let found = tree.nearest_n::<SquaredEuclidean>(&[p.x, p.y], qty);
            let mut list = Vec::with_capacity(found.len());
            for nn in found {
                let j = nn.item as usize;
                if j == i {
                    continue;
                }
                let v = points[j] - p;
                list.push((j, v, v.norm()));
            }
            list.sort_by(|a, b| a.2.total_cmp(&b.2));
            knn.push(list);
        }

        let spacing = median(
            knn.iter()
                .filter_map(|l| l.first().map(|n| n.2))
                .filter(|&d| d >= params.min_spacing_pix)
                .collect(),
        )?;

        let lo = (params.min_spacing_ratio * spacing).max(params.min_spacing_pix);
        let hi = params.max_spacing_ratio * spacing;
        let in_window = |d: f32| d >= lo && d <= hi;

        // Diagonals sit near sqrt(2) * spacing and would cancel the axes in 4θ space.
        let axis_hi = hi.min(1.25 * spacing);
        let axis_angle = dominant_axis_angle(
            knn.iter()
                .flat_map(|l| l.iter())
                .filter(|n| n.2 >= lo && n.2 <= axis_hi)
                .map(|n| (n.1, 1.0)),
        )?;

        let tol = params.orientation_tolerance_deg.to_radians();
        let mut directed: Vec<Vec<NodeNeighbor>> = Vec::with_capacity(points.len());
        for list in &knn {
            let mut candidates = Vec::new();
            for &(j, v, d) in list {
                if !in_window(d) {
                    continue;
                }
                let local = rotate_back(v, axis_angle);
                let deviation = axis_deviation(local);
                if deviation > tol {
                    continue;
                }
                candidates.push(NodeNeighbor {
                    direction: direction_quadrant(&local),
                    index: j,
                    distance: d,
                    score: deviation + 0.5 * (d / spacing - 1.0).abs(),
                });
            }
            directed.push(select_neighbors(candidates));
        }

        // Keep only edges both endpoints agree on.
        let neighbors = directed
            .iter()
            .enumerate()
            .map(|(i, list)| {
                list.iter()
                    .filter(|n| {
                        directed[n.index]
                            .iter()
                            .any(|back| back.index == i && back.direction == n.direction.opposite())
                    })
                    .cloned()
                    .collect()
            })
            .collect();

        Some(Self {
            neighbors,
            spacing,
            axis_angle,
        })
    }
}

pub fn connected_components(graph: &GridGraph) -> Vec<Vec<usize>> {
    let mut visited = vec![false; graph.neighbors.len()];
    let mut components = Vec::new();

    for start in 0..graph.neighbors.len() {
        if visited[start] {
            continue;
        }

        let mut component = Vec::new();
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            if visited[node] {
                continue;
            }
            visited[node] = true;
            component.push(node);

            for neighbor in &graph.neighbors[node] {
                if !visited[neighbor.index] {
                    stack.push(neighbor.index);
                }
            }
        }

        components.push(component);
    }

    components
}

/// BFS integer coordinates `(node, i, j)` for one component.
///
/// `None` when the component is not a consistent lattice: a node reached
/// twice with different coordinates, or two nodes sharing one coordinate.
pub fn assign_grid_coordinates(
    graph: &GridGraph,
    component: &[usize],
) -> Option<Vec<(usize, i32, i32)>> {
    let start = *component.first()?;
    let mut assigned: Vec<Option<(i32, i32)>> = vec![None; graph.neighbors.len()];
    let mut queue = VecDeque::new();
    let mut coords = Vec::with_capacity(component.len());

    assigned[start] = Some((0, 0));
    queue.push_back(start);

    while let Some(node) = queue.pop_front() {
        let (i, j) = assigned[node]?;
        coords.push((node, i, j));

        for neighbor in &graph.neighbors[node] {
            let (di, dj) = neighbor.direction.offset();
            let next = (i + di, j + dj);
            match assigned[neighbor.index] {
                None => {
                    assigned[neighbor.index] = Some(next);
                    queue.push_back(neighbor.index);
                }
                Some(existing) if existing != next => return None,
                Some(_) => {}
            }
        }
    }

    let unique: HashSet<(i32, i32)> = coords.iter().map(|&(_, i, j)| (i, j)).collect();
    if unique.len() != coords.len() {
        return None;
    }
    Some(coords)
}
