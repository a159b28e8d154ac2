use common_types::MAX_PALETTE_SIZE;

/// One level per bit of an 8-bit channel.
const MAX_DEPTH: usize = 8;

#[derive(Debug, Clone, Default)]
struct Node {
    red: u64,
    green: u64,
    blue: u64,
    count: u64,
    children: [Option<usize>; 8],
    leaf: bool,
    palette_index: u8,
}

/// Octree color quantizer.
///
/// Colors are inserted one at a time; whenever the leaf count exceeds the
/// target, the deepest reducible node folds its children into itself. All
/// children of the node being folded are leaves at that point, so the leaf
/// count never overshoots by more than one insert.
#[derive(Debug, Clone)]
pub struct Octree {
    nodes: Vec<Node>,
    reducible: Vec<Vec<usize>>,
    leaf_count: usize,
    max_colors: usize,
    palette: Vec<[u8; 3]>,
}

impl Octree {
    pub fn new(max_colors: usize) -> Self {
        let mut reducible = vec![Vec::new(); MAX_DEPTH];
        reducible[0].push(0);
        Self {
            nodes: vec![Node::default()],
            reducible,
            leaf_count: 0,
            max_colors: max_colors.clamp(1, MAX_PALETTE_SIZE),
            palette: Vec::new(),
        }
    }

    pub fn insert(&mut self, rgb: [u8; 3]) {
        let mut node = 0;
        for level in 0..MAX_DEPTH {
            if self.nodes[node].leaf {
                break;
            }
            let slot = child_slot(rgb, level);
            node = match self.nodes[node].children[slot] {
                Some(child) => child,
                None => self.add_child(node, slot, level + 1),
            };
        }

        let leaf = &mut self.nodes[node];
        leaf.red += rgb[0] as u64;
        leaf.green += rgb[1] as u64;
        leaf.blue += rgb[2] as u64;
        leaf.count += 1;

        while self.leaf_count > self.max_colors {
            if !self.reduce() {
                break;
            }
        }
    }

    fn add_child(&mut self, parent: usize, slot: usize, level: usize) -> usize {
        let child = self.nodes.len();
        let leaf = level == MAX_DEPTH;
        self.nodes.push(Node {
            leaf,
            ..Node::default()
        });
        if leaf {
            self.leaf_count += 1;
        } else {
            self.reducible[level].push(child);
        }
        self.nodes[parent].children[slot] = Some(child);
        child
    }

    /// Folds the deepest reducible node; false when nothing is left to fold.
    fn reduce(&mut self) -> bool {
        let Some(level) = (0..MAX_DEPTH).rev().find(|&l| !self.reducible[l].is_empty()) else {
            return false;
        };
        let Some(node) = self.reducible[level].pop() else {
            return false;
        };

        let children = std::mem::take(&mut self.nodes[node].children);
        let (mut red, mut green, mut blue, mut count, mut merged) = (0, 0, 0, 0, 0usize);
        for child in children.into_iter().flatten() {
            let c = &self.nodes[child];
            red += c.red;
            green += c.green;
            blue += c.blue;
            count += c.count;
            merged += 1;
        }

        let n = &mut self.nodes[node];
        n.red += red;
        n.green += green;
        n.blue += blue;
        n.count += count;
        n.leaf = true;

        self.leaf_count -= merged;
        self.leaf_count += 1;
        true
    }

    /// Assigns palette indices to leaves (depth-first) and returns the colors.
    pub fn build_palette(&mut self) -> &[[u8; 3]] {
        self.palette.clear();
        let mut stack = vec![0usize];
        while let Some(node) = stack.pop() {
            if self.nodes[node].leaf {
                let n = &mut self.nodes[node];
                let count = n.count.max(1);
                n.palette_index = self.palette.len() as u8;
                self.palette.push([
                    (n.red / count) as u8,
                    (n.green / count) as u8,
                    (n.blue / count) as u8,
                ]);
                continue;
            }
            // Reverse so slot 0 is visited first.
            stack.extend(self.nodes[node].children.iter().rev().flatten());
        }
        &self.palette
    }

    /// Palette index for a color; call after [`Octree::build_palette`].
    pub fn index_of(&self, rgb: [u8; 3]) -> u8 {
        let mut node = 0;
        for level in 0..MAX_DEPTH {
            if self.nodes[node].leaf {
                return self.nodes[node].palette_index;
            }
            match self.nodes[node].children[child_slot(rgb, level)] {
                Some(child) => node = child,
                None => return self.nearest(rgb),
            }
        }
        if self.nodes[node].leaf {
            self.nodes[node].palette_index
        } else {
            self.nearest(rgb)
        }
    }

    fn nearest(&self, rgb: [u8; 3]) -> u8 {
        let distance = |p: &[u8; 3]| -> u32 {
            let dr = rgb[0] as i32 - p[0] as i32;
            let dg = rgb[1] as i32 - p[1] as i32;
            let db = rgb[2] as i32 - p[2] as i32;
            (dr * dr + dg * dg + db * db) as u32
        };
        self.palette
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| distance(p))
            .map(|(i, _)| i as u8)
            .unwrap_or(0)
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }
}

fn child_slot(rgb: [u8; 3], level: usize) -> usize {
    let shift = 7 - level;
    let r = ((rgb[0] >> shift) & 1) as usize;
    let g = ((rgb[1] >> shift) & 1) as usize;
    let b = ((rgb[2] >> shift) & 1) as usize;
    (r << 2) | (g << 1) | b
}

/// Runs the octree over opaque pixels, returns (RGB palette, one index per pixel).
pub(crate) fn quantize(pixels: &[[u8; 3]], max_colors: usize) -> (Vec<u8>, Vec<u8>) {
    let mut tree = Octree::new(max_colors);
    for &px in pixels {
        tree.insert(px);
    }
    let palette: Vec<u8> = tree.build_palette().iter().flatten().copied().collect();
    let indices = pixels.iter().map(|&px| tree.index_of(px)).collect();
    (palette, indices)
}
