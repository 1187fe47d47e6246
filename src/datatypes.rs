/// A mesh vertex. Only the first `dim` coordinates are meaningful.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub coords: [f64; 3],
}

#[derive(Debug, Clone)]
pub struct Node {
    pub vertex: Vertex,
}

/// A voxel element. Local nodes run row-major over the element's
/// `(order + 1)^dim` node lattice, following the global row-major ordering.
#[derive(Debug, Clone)]
pub struct Element {
    pub nodes: Vec<usize>,
    /// Grid index of the originating voxel
    pub voxel: [usize; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Min,
    Max,
}

/// Named vertex subsets of a box domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// Every vertex
    All,
    /// Vertices on the min or max face normal to `axis`
    Face { axis: usize, side: Side },
    /// Vertices on the given face of `axis` whose coordinates along every
    /// other axis sit at a domain min or max
    Corners { axis: usize, side: Side },
}

impl Region {
    pub fn name(&self) -> String {
        let side_name = |side: &Side| match side {
            Side::Min => "min",
            Side::Max => "max",
        };
        match self {
            Region::All => "region_all".to_owned(),
            Region::Face { axis, side } => {
                format!("region_{}_{}", axis_name(*axis), side_name(side))
            }
            Region::Corners { axis, side } => {
                format!("region_{}_{}_corners", axis_name(*axis), side_name(side))
            }
        }
    }
}

pub fn axis_name(axis: usize) -> &'static str {
    ["x", "y", "z"][axis]
}
