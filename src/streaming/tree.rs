//! Page quadtree over an equirectangular image
//!
//! The tree is built once, eagerly, down to the finest level. Pages live in a
//! flat arena; children are referenced by arena index.

use std::collections::HashMap;
use std::f64::consts::{FRAC_PI_2, PI};

use crate::core::types::DVec3;
use crate::math::Cone;
use crate::streaming::detail::{max_level, page_span};
use crate::streaming::page::{FileId, Page, PageId, PageKey};

/// Boundary samples per page edge for cone fitting
const EDGE_SAMPLES: usize = 9;

/// Source-pixel rectangle covered by a page, clipped to the image
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRegion {
    pub x: u64,
    pub y: u64,
    pub width: u64,
    pub height: u64,
}

/// Region of the source image covered by `id`, or `None` when the page lies
/// entirely outside the image
pub fn page_region(id: PageId, width: u32, height: u32, tile_size: u32) -> Option<PixelRegion> {
    let depth = max_level(width, height, tile_size);
    if id.level > depth {
        return None;
    }
    let span = page_span(id.level, depth, tile_size);
    let x = id.col as u64 * span;
    let y = id.row as u64 * span;
    let (w, h) = (width as u64, height as u64);
    if x >= w || y >= h {
        return None;
    }
    Some(PixelRegion {
        x,
        y,
        width: span.min(w - x),
        height: span.min(h - y),
    })
}

/// Unit direction of the equirectangular coordinate `(u, v)` in `[0, 1]²`.
///
/// `u` runs west to east from longitude -π, `v` north to south. +Y is north.
pub fn direction(u: f64, v: f64) -> DVec3 {
    let lon = -PI + u * 2.0 * PI;
    let lat = FRAC_PI_2 - v * PI;
    DVec3::new(lat.cos() * lon.sin(), lat.sin(), lat.cos() * lon.cos())
}

/// Bounding cone of the normalized rectangle `[u0, u1] x [v0, v1]`
fn region_cone(u0: f64, v0: f64, u1: f64, v1: f64) -> Cone {
    // A lune wider than a hemisphere is not bounded by its boundary samples
    if u1 - u0 > 0.5 {
        return Cone::new(DVec3::Z, PI);
    }

    let last = (EDGE_SAMPLES - 1) as f64;
    let mut samples = Vec::with_capacity(EDGE_SAMPLES * 4 + 1);
    for i in 0..EDGE_SAMPLES {
        let t = i as f64 / last;
        let u = u0 + (u1 - u0) * t;
        let v = v0 + (v1 - v0) * t;
        samples.push(direction(u, v0));
        samples.push(direction(u, v1));
        samples.push(direction(u0, v));
        samples.push(direction(u1, v));
    }
    samples.push(direction((u0 + u1) * 0.5, (v0 + v1) * 0.5));

    let fitted = Cone::from_directions(&samples);
    // Every boundary point is within half a sample step of some sample
    let step = ((u1 - u0) * 2.0 * PI).max((v1 - v0) * PI) / last;
    Cone::new(fitted.axis, fitted.half_angle + step * 0.5)
}

struct Node {
    page: Page,
    children: [Option<usize>; 4],
}

/// Quadtree of pages for one file
pub struct PageTree {
    file: FileId,
    width: u32,
    height: u32,
    tile_size: u32,
    max_level: u32,
    nodes: Vec<Node>,
    lookup: HashMap<PageId, usize>,
}

impl PageTree {
    /// Root index in the arena
    pub const ROOT: usize = 0;

    /// Build every page of a `width` x `height` image split into
    /// `tile_size` pages.
    pub fn new(file: FileId, width: u32, height: u32, tile_size: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let tile_size = tile_size.max(1);
        let depth = max_level(width, height, tile_size);

        let mut tree = Self {
            file,
            width,
            height,
            tile_size,
            max_level: depth,
            nodes: Vec::new(),
            lookup: HashMap::new(),
        };

        // Parents are pushed before children, so the root lands at index 0
        let mut stack = vec![(PageId::ROOT, None::<(usize, usize)>)];
        while let Some((id, parent)) = stack.pop() {
            let Some(region) = page_region(id, width, height, tile_size) else {
                continue;
            };
            let index = tree.nodes.len();
            let leaf = id.level == depth;
            let cone = region_cone(
                region.x as f64 / width as f64,
                region.y as f64 / height as f64,
                (region.x + region.width) as f64 / width as f64,
                (region.y + region.height) as f64 / height as f64,
            );
            tree.nodes.push(Node {
                page: Page::new(id, cone, leaf),
                children: [None; 4],
            });
            tree.lookup.insert(id, index);
            if let Some((parent, slot)) = parent {
                tree.nodes[parent].children[slot] = Some(index);
            }
            if !leaf {
                for (slot, child) in id.children().into_iter().enumerate().rev() {
                    stack.push((child, Some((index, slot))));
                }
            }
        }

        log::debug!(
            "Built page tree for file {}: {}x{} px, {} levels, {} pages",
            file,
            width,
            height,
            depth + 1,
            tree.nodes.len()
        );
        tree
    }

    pub fn file(&self) -> FileId {
        self.file
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Finest level in the tree
    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    /// Number of pages
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn page(&self, index: usize) -> &Page {
        &self.nodes[index].page
    }

    pub fn page_mut(&mut self, index: usize) -> &mut Page {
        &mut self.nodes[index].page
    }

    /// Cache key of the page at `index`
    pub fn key(&self, index: usize) -> PageKey {
        PageKey::new(self.file, self.nodes[index].page.id)
    }

    /// Arena indices of the existing children of `index`
    pub fn children(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.nodes[index].children.iter().flatten().copied()
    }

    /// Arena index of a page
    pub fn find(&self, id: PageId) -> Option<usize> {
        self.lookup.get(&id).copied()
    }

    /// Source region of the page at `index`
    pub fn region(&self, index: usize) -> Option<PixelRegion> {
        page_region(self.nodes[index].page.id, self.width, self.height, self.tile_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_page_tree() {
        let tree = PageTree::new(0, 200, 100, 256);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.max_level(), 0);
        assert!(tree.page(PageTree::ROOT).leaf);
        assert_eq!(tree.children(PageTree::ROOT).count(), 0);
    }

    #[test]
    fn test_square_tree_is_full() {
        // 1024 / 256 -> levels 0..=2, 1 + 4 + 16 pages
        let tree = PageTree::new(3, 1024, 1024, 256);
        assert_eq!(tree.max_level(), 2);
        assert_eq!(tree.len(), 21);
        assert_eq!(tree.key(PageTree::ROOT), PageKey::new(3, PageId::ROOT));
        assert_eq!(tree.children(PageTree::ROOT).count(), 4);
    }

    #[test]
    fn test_children_only_where_image_exists() {
        // 2:1 image: the bottom half of the root footprint is empty
        let tree = PageTree::new(0, 1024, 512, 256);
        assert_eq!(tree.max_level(), 2);
        let root_children: Vec<PageId> = tree
            .children(PageTree::ROOT)
            .map(|i| tree.page(i).id)
            .collect();
        assert_eq!(root_children, vec![PageId::new(1, 0, 0), PageId::new(1, 0, 1)]);
        // 1 + 2 + 8
        assert_eq!(tree.len(), 11);
        assert!(tree.find(PageId::new(1, 1, 0)).is_none());
    }

    #[test]
    fn test_partial_edge_regions() {
        let region = page_region(PageId::new(1, 0, 1), 1000, 500, 256).unwrap();
        assert_eq!(region, PixelRegion { x: 512, y: 0, width: 488, height: 500 });
        assert!(page_region(PageId::new(2, 2, 0), 1000, 500, 256).is_none());
    }

    #[test]
    fn test_parent_cone_contains_child_corners() {
        let (w, h) = (4096u32, 2048u32);
        let tree = PageTree::new(0, w, h, 256);
        for index in 0..tree.len() {
            let parent = tree.page(index).cone;
            for child in tree.children(index) {
                let r = tree.region(child).unwrap();
                let (u0, v0) = (r.x as f64 / w as f64, r.y as f64 / h as f64);
                let u1 = (r.x + r.width) as f64 / w as f64;
                let v1 = (r.y + r.height) as f64 / h as f64;
                for (u, v) in [(u0, v0), (u1, v0), (u0, v1), (u1, v1)] {
                    assert!(
                        parent.contains_direction(direction(u, v)),
                        "corner of {:?} escapes {:?}",
                        tree.page(child).id,
                        tree.page(index).id
                    );
                }
            }
        }
    }

    #[test]
    fn test_cone_contains_page_center() {
        let tree = PageTree::new(0, 2048, 1024, 256);
        let index = tree.find(PageId::new(3, 1, 5)).unwrap();
        let region = tree.region(index).unwrap();
        let center = direction(
            (region.x as f64 + region.width as f64 * 0.5) / 2048.0,
            (region.y as f64 + region.height as f64 * 0.5) / 1024.0,
        );
        assert!(tree.page(index).cone.contains_direction(center));
        assert!(tree.page(index).cone.half_angle < 0.7);
    }

    #[test]
    fn test_direction_axes() {
        assert!((direction(0.5, 0.5) - DVec3::Z).length() < 1e-12);
        assert!((direction(0.5, 0.0) - DVec3::Y).length() < 1e-12);
        assert!((direction(0.75, 0.5) - DVec3::X).length() < 1e-12);
    }
}
