use crate::geometry::Region;

/// Relative tolerance for two windows to count as the same object
const EPS: f64 = 0.2;

#[derive(Debug, Clone, Copy)]
struct Rect {
    x: i64,
    y: i64,
    w: i64,
    h: i64,
}

impl From<Region> for Rect {
    fn from(r: Region) -> Self {
        Rect {
            x: r.x as i64,
            y: r.y as i64,
            w: r.width as i64,
            h: r.height as i64,
        }
    }
}

fn similar(a: &Rect, b: &Rect) -> bool {
    let delta = EPS * (a.w.min(b.w) + a.h.min(b.h)) as f64 * 0.5;
    ((a.x - b.x).abs() as f64) <= delta
        && ((a.y - b.y).abs() as f64) <= delta
        && ((a.x + a.w - b.x - b.w).abs() as f64) <= delta
        && ((a.y + a.h - b.y - b.h).abs() as f64) <= delta
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Merge overlapping detector hits into one averaged region per object.
///
/// Clusters need more than `min_neighbors` members to survive, and a cluster
/// lying inside a better-supported one is dropped. With `min_neighbors == 0`
/// the input comes back unchanged.
pub fn group_rectangles(hits: &[Region], min_neighbors: usize) -> Vec<Region> {
    if min_neighbors == 0 || hits.is_empty() {
        return hits.to_vec();
    }

    let rects: Vec<Rect> = hits.iter().map(|&r| r.into()).collect();
    let mut parent: Vec<usize> = (0..rects.len()).collect();
    for i in 0..rects.len() {
        for j in 0..i {
            if similar(&rects[i], &rects[j]) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[ri.max(rj)] = ri.min(rj);
                }
            }
        }
    }

    // Cluster ids follow the first appearance of each root
    let mut cluster_of_root = vec![usize::MAX; rects.len()];
    let mut sums: Vec<([i64; 4], usize)> = Vec::new();
    for (i, r) in rects.iter().enumerate() {
        let root = find(&mut parent, i);
        if cluster_of_root[root] == usize::MAX {
            cluster_of_root[root] = sums.len();
            sums.push(([0; 4], 0));
        }
        let (sum, count) = &mut sums[cluster_of_root[root]];
        sum[0] += r.x;
        sum[1] += r.y;
        sum[2] += r.w;
        sum[3] += r.h;
        *count += 1;
    }

    let clusters: Vec<(Rect, usize)> = sums
        .into_iter()
        .map(|(s, n)| {
            let avg = |v: i64| (v as f64 / n as f64).round() as i64;
            (
                Rect {
                    x: avg(s[0]),
                    y: avg(s[1]),
                    w: avg(s[2]),
                    h: avg(s[3]),
                },
                n,
            )
        })
        .collect();

    let mut grouped = Vec::new();
    for (i, &(r1, n1)) in clusters.iter().enumerate() {
        if n1 <= min_neighbors {
            continue;
        }
        let dx = (r1.w as f64 * EPS).round() as i64;
        let dy = (r1.h as f64 * EPS).round() as i64;
        let swallowed = clusters.iter().enumerate().any(|(j, &(r2, n2))| {
            j != i
                && n2 > min_neighbors
                && r1.x >= r2.x - dx
                && r1.y >= r2.y - dy
                && r1.x + r1.w <= r2.x + r2.w + dx
                && r1.y + r1.h <= r2.y + r2.h + dy
                && (n2 > n1.max(3) || n1 < 3)
        });
        if !swallowed {
            grouped.push(Region::new(r1.x as u32, r1.y as u32, r1.w as u32, r1.h as u32));
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_neighbors_returns_raw() {
        let hits = vec![Region::new(0, 0, 10, 10), Region::new(1, 1, 10, 10)];
        assert_eq!(group_rectangles(&hits, 0), hits);
    }

    #[test]
    fn test_cluster_is_averaged() {
        let hits = vec![
            Region::new(10, 10, 20, 20),
            Region::new(12, 10, 20, 20),
            Region::new(11, 12, 20, 20),
            Region::new(200, 200, 20, 20),
        ];
        assert_eq!(group_rectangles(&hits, 2), vec![Region::new(11, 11, 20, 20)]);
    }

    #[test]
    fn test_sparse_cluster_dropped() {
        let hits = vec![Region::new(10, 10, 20, 20), Region::new(11, 10, 20, 20)];
        assert!(group_rectangles(&hits, 2).is_empty());
        assert_eq!(group_rectangles(&hits, 1).len(), 1);
    }

    #[test]
    fn test_nested_weak_cluster_removed() {
        let mut hits = vec![Region::new(0, 0, 60, 60); 6];
        hits.extend(vec![Region::new(20, 20, 10, 10); 2]);
        assert_eq!(group_rectangles(&hits, 1), vec![Region::new(0, 0, 60, 60)]);
    }

    #[test]
    fn test_clusters_keep_first_appearance_order() {
        let mut hits = vec![Region::new(100, 0, 20, 20); 2];
        hits.extend(vec![Region::new(0, 0, 20, 20); 3]);
        assert_eq!(
            group_rectangles(&hits, 1),
            vec![Region::new(100, 0, 20, 20), Region::new(0, 0, 20, 20)]
        );
    }
}
