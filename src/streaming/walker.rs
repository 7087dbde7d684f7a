//! Per-frame quadtree walk
//!
//! Visits a page tree top-down against the current frusta. Pages in demand
//! (see [`Page::needed`](crate::streaming::Page::needed)) are requested, or
//! kept alive if already resident, and their children are visited. Visible
//! pages that are not in demand are drawn with whatever stands in for them.
//! Pages at or above the minimum level are always in demand so a coarse base
//! layer stays resident.

use crate::math::Frustum;
use crate::render::TextureAllocator;
use crate::streaming::cache::{PageBinding, PageCache};
use crate::streaming::page::PageKey;
use crate::streaming::tree::PageTree;

/// What the walker sees this frame
#[derive(Clone, Debug)]
pub struct View {
    pub frusta: Vec<Frustum>,
    /// Inner and outer radius of the shell the pages are draped on
    pub r0: f64,
    pub r1: f64,
    /// Frame serial; memoizes visibility within one frame
    pub serial: u64,
    /// Texel-to-pixel ratio below which children are requested
    pub cutoff: f64,
    /// Pages at or above this level are always in demand
    pub min_level: u32,
}

/// A page to draw and the texture standing in for it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawItem {
    pub key: PageKey,
    pub binding: PageBinding,
}

/// Outcome of one walk
#[derive(Clone, Debug, Default)]
pub struct WalkResult {
    /// Pages examined
    pub visited: usize,
    /// New need tasks queued
    pub needed: usize,
    /// Resident pages kept alive
    pub cached: usize,
    /// Invisible pages not in demand (culled with their subtrees)
    pub skipped: usize,
    /// Frontier pages in draw order
    pub draw: Vec<DrawItem>,
}

/// Reusable walk state
#[derive(Default)]
pub struct Walker {
    stack: Vec<usize>,
}

impl Walker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk `tree`, feeding requests to `cache`
    pub fn walk<A: TextureAllocator>(
        &mut self,
        tree: &mut PageTree,
        cache: &mut PageCache<A>,
        view: &View,
    ) -> WalkResult {
        let mut result = WalkResult::default();
        let tile_size = tree.tile_size();
        self.stack.clear();
        if !tree.is_empty() {
            self.stack.push(PageTree::ROOT);
        }

        while let Some(index) = self.stack.pop() {
            result.visited += 1;
            let key = tree.key(index);
            let page = tree.page_mut(index);
            let needed = page.needed(
                &view.frusta,
                view.r0,
                view.r1,
                view.serial,
                tile_size,
                view.cutoff,
                view.min_level,
            );
            // Memoized per serial
            let visible = page.visible(&view.frusta, view.r0, view.r1, view.serial);
            let leaf = page.leaf;
            let level = page.id.level;

            if !needed {
                if visible {
                    result.draw.push(DrawItem {
                        key,
                        binding: cache.get_binding(key),
                    });
                } else {
                    result.skipped += 1;
                }
                continue;
            }

            if cache.use_needed(key) {
                result.cached += 1;
            } else if cache.add_needed(key, -(level as i32)) {
                result.needed += 1;
            }

            if leaf {
                if visible {
                    result.draw.push(DrawItem {
                        key,
                        binding: cache.get_binding(key),
                    });
                }
            } else {
                // Reverse so children pop in row-major order
                let first = self.stack.len();
                self.stack.extend(tree.children(index));
                self.stack[first..].reverse();
            }
        }

        log::trace!(
            "Walk of file {}: {} visited, {} needed, {} cached, {} skipped, {} drawn",
            tree.file(),
            result.visited,
            result.needed,
            result.cached,
            result.skipped,
            result.draw.len()
        );
        result
    }
}
