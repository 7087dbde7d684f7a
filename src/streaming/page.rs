//! Page identity and per-page visibility state
//!
//! A page is one node of a quadtree image pyramid. Level 0 is the root page
//! covering the whole image; each level below halves the page footprint.

use std::fmt;

use crate::math::{Cone, Frustum};
use crate::streaming::detail::{projected_solid_angle, texel_ratio};

/// Index of a file in the [`FileTable`](crate::streaming::FileTable)
pub type FileId = u16;

/// Position of a page in its pyramid
///
/// Ordering is by level, then linear index within the level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    pub level: u32,
    pub row: u32,
    pub col: u32,
}

/// Number of pages in all levels above `level` of a full quadtree.
/// Valid up to `PageId::MAX_LEVEL + 1`.
fn level_offset(level: u32) -> u64 {
    (((1u128 << (2 * level)) - 1) / 3) as u64
}

impl PageId {
    pub const ROOT: PageId = PageId { level: 0, row: 0, col: 0 };

    /// Deepest level whose linear indices fit in a `u64`
    pub const MAX_LEVEL: u32 = 31;

    pub fn new(level: u32, row: u32, col: u32) -> Self {
        Self { level, row, col }
    }

    /// Linear index in a full quadtree, root first, row-major within a level.
    ///
    /// The level must not exceed [`PageId::MAX_LEVEL`].
    pub fn index(&self) -> u64 {
        debug_assert!(self.level <= Self::MAX_LEVEL);
        level_offset(self.level) + ((self.row as u64) << self.level) + self.col as u64
    }

    /// Inverse of [`PageId::index`]
    ///
    /// # Returns
    /// `None` for indices past the last page of [`PageId::MAX_LEVEL`].
    pub fn from_index(index: u64) -> Option<Self> {
        if index >= level_offset(Self::MAX_LEVEL + 1) {
            return None;
        }
        let mut level = 0;
        while level_offset(level + 1) <= index {
            level += 1;
        }
        let local = index - level_offset(level);
        Some(Self {
            level,
            row: (local >> level) as u32,
            col: (local & ((1u64 << level) - 1)) as u32,
        })
    }

    pub fn parent(&self) -> Option<PageId> {
        if self.level == 0 {
            None
        } else {
            Some(PageId::new(self.level - 1, self.row / 2, self.col / 2))
        }
    }

    /// The four potential children in row-major order
    pub fn children(&self) -> [PageId; 4] {
        let (l, r, c) = (self.level + 1, self.row * 2, self.col * 2);
        [
            PageId::new(l, r, c),
            PageId::new(l, r, c + 1),
            PageId::new(l, r + 1, c),
            PageId::new(l, r + 1, c + 1),
        ]
    }

    /// Whether `self` is `other` or one of its descendants
    pub fn is_within(&self, other: &PageId) -> bool {
        if self.level < other.level {
            return false;
        }
        let shift = self.level - other.level;
        self.row >> shift == other.row && self.col >> shift == other.col
    }
}

/// Globally unique page identity: file plus position
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageKey {
    pub file: FileId,
    pub page: PageId,
}

impl PageKey {
    pub fn new(file: FileId, page: PageId) -> Self {
        Self { file, page }
    }

    pub fn parent(&self) -> Option<PageKey> {
        self.page.parent().map(|page| PageKey { file: self.file, page })
    }

    /// Ancestors from the parent up to the root
    pub fn ancestors(&self) -> impl Iterator<Item = PageKey> {
        std::iter::successors(self.parent(), |key| key.parent())
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}/{}", self.file, self.page.level, self.page.row, self.page.col)
    }
}

/// Static geometry of a page plus its per-frame visibility memo
#[derive(Clone, Debug)]
pub struct Page {
    pub id: PageId,
    /// Directions from the sphere center covered by the page
    pub cone: Cone,
    /// Whether the page has no children
    pub leaf: bool,
    /// Serial the memo below was computed for
    memo_serial: Option<u64>,
    memo_visible: bool,
    /// First frustum that reported an intersection
    memo_frustum: Option<usize>,
}

impl Page {
    pub fn new(id: PageId, cone: Cone, leaf: bool) -> Self {
        Self {
            id,
            cone,
            leaf,
            memo_serial: None,
            memo_visible: false,
            memo_frustum: None,
        }
    }

    /// Whether the page's shell segment `[r0, r1]` intersects any frustum.
    ///
    /// The result is computed at most once per `serial`; later calls with
    /// the same serial return the memoized answer.
    pub fn visible(&mut self, frusta: &[Frustum], r0: f64, r1: f64, serial: u64) -> bool {
        if self.memo_serial == Some(serial) {
            return self.memo_visible;
        }

        let hit = frusta.iter().position(|f| f.intersects_cone(&self.cone, r0, r1));
        self.memo_serial = Some(serial);
        self.memo_visible = hit.is_some();
        self.memo_frustum = hit;
        self.memo_visible
    }

    /// Index of the first frustum that saw the page at the last test
    pub fn visible_frustum(&self) -> Option<usize> {
        if self.memo_visible { self.memo_frustum } else { None }
    }

    /// Texels per screen pixel, measured from the nearest eye
    pub fn texel_ratio(&self, frusta: &[Frustum], r1: f64, tile_size: u32) -> f64 {
        let nearest = frusta.iter().min_by(|a, b| {
            let da = self.cone.nearest_distance(a.eye, r1);
            let db = self.cone.nearest_distance(b.eye, r1);
            da.total_cmp(&db)
        });
        let Some(frustum) = nearest else {
            return f64::INFINITY;
        };
        let distance = self.cone.nearest_distance(frustum.eye, r1);
        let solid_angle = projected_solid_angle(self.cone.cap_area(r1), distance);
        texel_ratio(tile_size, solid_angle, frustum.pixels_per_steradian)
    }

    /// Whether the page is in demand: it should be loaded and its children
    /// examined.
    ///
    /// Pages at or above `min_level` always are. Any other page is when it
    /// is visible and has fewer texels per pixel than `cutoff`, that is when
    /// it is too coarse for its footprint on screen. Leaves follow the same
    /// rule; they simply have no children to examine.
    #[allow(clippy::too_many_arguments)]
    pub fn needed(
        &mut self,
        frusta: &[Frustum],
        r0: f64,
        r1: f64,
        serial: u64,
        tile_size: u32,
        cutoff: f64,
        min_level: u32,
    ) -> bool {
        if self.id.level <= min_level {
            return true;
        }
        self.visible(frusta, r0, r1, serial) && self.texel_ratio(frusta, r1, tile_size) < cutoff
    }
}
