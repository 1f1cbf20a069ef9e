// vis.rs - PVS/PHS rows, fat PVS merging, head node visibility

use brushtrace_common::qfiles::{read_i32_le, DVIS_PHS, DVIS_PVS, MAX_MAP_LEAFS};
use log::{debug, warn};
use rayon::prelude::*;

use crate::bsp::{BspTree, NodeChild};
use crate::error::{CmError, Result};

/// Which precomputed set a row comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisKind {
    /// Potentially visible set.
    #[default]
    Pvs,
    /// Potentially hearable set.
    Phs,
}

impl VisKind {
    fn slot(self) -> usize {
        match self {
            VisKind::Pvs => DVIS_PVS,
            VisKind::Phs => DVIS_PHS,
        }
    }
}

/// Bytes in one row for `numclusters` clusters.
#[inline]
pub fn row_bytes(numclusters: usize) -> usize {
    (numclusters + 7) >> 3
}

/// The visibility lump: a cluster count, per-cluster offsets of the
/// compressed PVS and PHS rows, then the rows themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisData {
    /// Offsets into `data`, indexed by [`VisKind`].
    bitofs: Vec<[usize; 2]>,
    data: Vec<u8>,
}

impl VisData {
    /// Parses and bounds-checks a visibility lump. An empty lump means the
    /// map was compiled without vis.
    pub fn parse(lump: &[u8]) -> Result<Self> {
        if lump.is_empty() {
            return Ok(Self::default());
        }
        if lump.len() < 4 {
            return Err(CmError::FunnyLumpSize { lump: "visibility" });
        }
        let numclusters = read_i32_le(lump, 0);
        if numclusters < 0 || 4 + numclusters as usize * 8 > lump.len() {
            return Err(CmError::FunnyLumpSize { lump: "visibility" });
        }
        let mut bitofs = Vec::with_capacity(numclusters as usize);
        for i in 0..numclusters as usize {
            let base = 4 + i * 8;
            let mut pair = [0usize; 2];
            for (slot, ofs) in pair.iter_mut().enumerate() {
                let raw = read_i32_le(lump, base + slot * 4);
                *ofs = crate::error::check_index("visibility offset", raw as i64, lump.len())?;
            }
            bitofs.push(pair);
        }
        Ok(Self {
            bitofs,
            data: lump.to_vec(),
        })
    }

    /// Compresses one PVS and one PHS row per cluster into lump form.
    pub fn from_rows(pvs: &[Vec<u8>], phs: &[Vec<u8>]) -> Self {
        let numclusters = pvs.len().max(phs.len());
        let mut data = Vec::new();
        data.extend_from_slice(&(numclusters as i32).to_le_bytes());
        data.resize(4 + numclusters * 8, 0);

        let mut bitofs = Vec::with_capacity(numclusters);
        for c in 0..numclusters {
            let mut pair = [0usize; 2];
            for (slot, rows) in [pvs, phs].into_iter().enumerate() {
                pair[slot] = data.len();
                let row = rows.get(c).map(Vec::as_slice).unwrap_or(&[]);
                data.extend(compress_vis(row));
                let ofs = 4 + c * 8 + slot * 4;
                data[ofs..ofs + 4].copy_from_slice(&(pair[slot] as i32).to_le_bytes());
            }
            bitofs.push(pair);
        }
        Self { bitofs, data }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clusters recorded in the lump header.
    pub fn num_clusters(&self) -> usize {
        self.bitofs.len()
    }

    /// The raw lump bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Decompressed row for `cluster`.
    ///
    /// Cluster -1 sees nothing; a map without vis sees everything.
    pub fn cluster_row(&self, cluster: i32, kind: VisKind, numclusters: usize) -> Vec<u8> {
        let row = row_bytes(numclusters);
        if cluster == -1 {
            return vec![0; row];
        }
        if self.data.is_empty() {
            // no vis info, so make all visible
            return vec![0xff; row];
        }
        let Some(ofs) = usize::try_from(cluster).ok().and_then(|c| self.bitofs.get(c)) else {
            warn!("cluster_row: bad cluster {} (numclusters {})", cluster, self.bitofs.len());
            return vec![0; row];
        };
        let mut out = vec![0; row];
        decompress_vis(&self.data, ofs[kind.slot()], &mut out);
        out
    }
}

/// Expands a run-length row starting at `offset` into `out`.
///
/// A zero byte is followed by a count of zero bytes.
pub fn decompress_vis(data: &[u8], offset: usize, out: &mut [u8]) {
    let row = out.len();
    let mut out_p = 0;
    let mut inp = offset;

    while out_p < row {
        let Some(&b) = data.get(inp) else {
            warn!("decompress_vis: ran off the end of the visibility data");
            out[out_p..].fill(0);
            return;
        };
        if b != 0 {
            out[out_p] = b;
            out_p += 1;
            inp += 1;
            continue;
        }

        let mut c = data.get(inp + 1).copied().unwrap_or(0) as usize;
        inp += 2;
        if c == 0 {
            // a zero count would never terminate
            out[out_p..].fill(0);
            return;
        }
        if out_p + c > row {
            c = row - out_p;
            debug!("warning: Vis decompression overrun");
        }
        out[out_p..out_p + c].fill(0);
        out_p += c;
    }
}

/// Run-length encodes a row the way the vis compiler does.
pub fn compress_vis(row: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(row.len());
    let mut j = 0;
    while j < row.len() {
        out.push(row[j]);
        if row[j] != 0 {
            j += 1;
            continue;
        }
        let mut rep = 1usize;
        j += 1;
        while j < row.len() && row[j] == 0 && rep < 255 {
            rep += 1;
            j += 1;
        }
        out.push(rep as u8);
    }
    out
}

/// Rows longer than this many bytes are merged in parallel.
const PARALLEL_ROW_BYTES: usize = 256;

/// ORs `rows` into one row of `row` bytes.
pub fn merge_rows(rows: &[Vec<u8>], row: usize) -> Vec<u8> {
    let mut out = vec![0u8; row];
    let or_chunk = |(chunk_idx, chunk): (usize, &mut [u8]), chunk_size: usize| {
        let base = chunk_idx * chunk_size;
        for src in rows {
            let Some(src) = src.get(base..(base + chunk.len()).min(src.len())) else {
                continue;
            };
            for (dst, s) in chunk.iter_mut().zip(src) {
                *dst |= *s;
            }
        }
    };

    if row > PARALLEL_ROW_BYTES && rows.len() >= 2 {
        out.par_chunks_mut(PARALLEL_ROW_BYTES)
            .enumerate()
            .for_each(|c| or_chunk(c, PARALLEL_ROW_BYTES));
    } else {
        or_chunk((0, out.as_mut_slice()), row.max(1));
    }
    out
}

/// Unique clusters of `leafs` in first-seen order; solid leaves are skipped.
pub(crate) fn leaf_clusters(tree: &BspTree, leafs: &[usize]) -> Vec<i32> {
    let mut clusters: Vec<i32> = Vec::with_capacity(leafs.len());
    for &l in leafs {
        let cluster = tree.leaf(l).cluster;
        if cluster != -1 && !clusters.contains(&cluster) {
            clusters.push(cluster);
        }
    }
    clusters
}

/// True if any leaf under `child` is in a cluster set in `visbits`.
pub fn headnode_visible(tree: &BspTree, child: NodeChild, visbits: &[u8], max_depth: usize) -> bool {
    fn walk(tree: &BspTree, child: NodeChild, visbits: &[u8], depth: usize, max_depth: usize, budget: &mut usize) -> bool {
        match child {
            NodeChild::Leaf(l) => {
                let cluster = tree.leaf(l).cluster;
                if cluster < 0 || cluster as usize >= MAX_MAP_LEAFS {
                    return false;
                }
                let byte = cluster as usize >> 3;
                visbits.get(byte).is_some_and(|b| b & (1 << (cluster & 7)) != 0)
            }
            NodeChild::Node(n) => {
                if depth >= max_depth {
                    warn!("headnode_visible: exceeded depth {} at node {}", max_depth, n);
                    return false;
                }
                // each node is visited once in a valid tree
                if *budget == 0 {
                    return false;
                }
                *budget -= 1;
                let Some(node) = tree.node(n) else {
                    return false;
                };
                walk(tree, node.children[0], visbits, depth + 1, max_depth, budget)
                    || walk(tree, node.children[1], visbits, depth + 1, max_depth, budget)
            }
        }
    }
    let mut budget = tree.nodes.len();
    walk(tree, child, visbits, 0, max_depth, &mut budget)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testmap;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_compress_known_rows() {
        assert_eq!(compress_vis(&[0x01]), vec![0x01]);
        assert_eq!(compress_vis(&[0, 0, 0, 0x80]), vec![0, 3, 0x80]);
        assert_eq!(compress_vis(&[0xff, 0, 0xff]), vec![0xff, 0, 1, 0xff]);
        let long = vec![0u8; 300];
        assert_eq!(compress_vis(&long), vec![0, 255, 0, 45]);
    }

    #[test]
    fn test_compress_then_decompress_random_rows() {
        let mut rng = StdRng::seed_from_u64(38);
        for _ in 0..50 {
            let len = rng.gen_range(1..600);
            // mostly zero, like real vis data
            let row: Vec<u8> = (0..len)
                .map(|_| if rng.gen_bool(0.2) { rng.gen() } else { 0 })
                .collect();
            let packed = compress_vis(&row);
            let mut out = vec![0xaa; len];
            decompress_vis(&packed, 0, &mut out);
            assert_eq!(out, row);
        }
    }

    #[test]
    fn test_decompress_clamps_overrun_and_truncation() {
        let mut out = [0xaa; 2];
        decompress_vis(&[0, 9], 0, &mut out);
        assert_eq!(out, [0, 0]);

        let mut out = [0xaa; 4];
        decompress_vis(&[0x05], 0, &mut out);
        assert_eq!(out, [0x05, 0, 0, 0]);
    }

    #[test]
    fn test_cluster_rows() {
        let vis = testmap::two_cluster_vis();
        assert_eq!(vis.num_clusters(), 2);
        assert_eq!(vis.cluster_row(0, VisKind::Pvs, 2), vec![0b01]);
        assert_eq!(vis.cluster_row(1, VisKind::Pvs, 2), vec![0b11]);
        assert_eq!(vis.cluster_row(0, VisKind::Phs, 2), vec![0b11]);
        assert_eq!(vis.cluster_row(-1, VisKind::Pvs, 2), vec![0]);
        assert_eq!(vis.cluster_row(7, VisKind::Pvs, 2), vec![0]);

        let parsed = VisData::parse(vis.as_bytes()).unwrap();
        assert_eq!(parsed, vis);
    }

    #[test]
    fn test_no_vis_sees_everything() {
        let vis = VisData::parse(&[]).unwrap();
        assert!(vis.is_empty());
        assert_eq!(vis.cluster_row(3, VisKind::Pvs, 12), vec![0xff, 0xff]);
        assert_eq!(vis.cluster_row(-1, VisKind::Pvs, 12), vec![0, 0]);
    }

    #[test]
    fn test_parse_rejects_bad_offsets() {
        let mut lump = testmap::two_cluster_vis().as_bytes().to_vec();
        lump[4..8].copy_from_slice(&9999i32.to_le_bytes());
        assert!(VisData::parse(&lump).is_err());
        assert!(VisData::parse(&[1, 0]).is_err());
    }

    #[test]
    fn test_merge_rows_small_and_parallel() {
        assert_eq!(merge_rows(&[vec![0b0001], vec![0b0100]], 1), vec![0b0101]);

        let row = 1000;
        let a: Vec<u8> = (0..row).map(|i| if i % 3 == 0 { 1 } else { 0 }).collect();
        let b: Vec<u8> = (0..row).map(|i| if i % 5 == 0 { 2 } else { 0 }).collect();
        let merged = merge_rows(&[a.clone(), b.clone()], row);
        for i in 0..row {
            assert_eq!(merged[i], a[i] | b[i]);
        }
    }

    #[test]
    fn test_headnode_visible() {
        let tree = testmap::slab_tree();
        // leaf 1 is cluster 0, leaf 2 is cluster 1
        assert!(headnode_visible(&tree, NodeChild::Node(0), &[0b01], 64));
        assert!(headnode_visible(&tree, NodeChild::Node(2), &[0b10], 64));
        assert!(!headnode_visible(&tree, NodeChild::Node(1), &[0b10], 64));
        // solid leaves have no cluster
        assert!(!headnode_visible(&tree, NodeChild::Leaf(0), &[0xff], 64));
        assert!(!headnode_visible(&tree, NodeChild::Node(0), &[], 64));
    }

    #[test]
    fn test_headnode_visible_stops_on_cyclic_tree() {
        let mut tree = testmap::slab_tree();
        tree.nodes[0].children = [NodeChild::Node(0), NodeChild::Node(0)];
        assert!(!headnode_visible(&tree, NodeChild::Node(0), &[0xff], 1024));

        // node 1 loops back to the root in place of leaf 1
        let mut tree = testmap::slab_tree();
        tree.nodes[1].children[0] = NodeChild::Node(0);
        assert!(!headnode_visible(&tree, NodeChild::Node(0), &[0b01], 1024));
    }
}
