//! Static decode tables: symbol trees, default probabilities, scan orders,
//! quantizer lookups, and the derived tables that are built once at startup.

use once_cell::sync::Lazy;

use super::prob::{CoefProbs, MvComponentProbs, ProbContext};

// Unified prediction-mode numbering shared by the context strips: intra
// modes occupy 0..10, inter modes 10..14.
pub const VERT_PRED: u8 = 0;
pub const HOR_PRED: u8 = 1;
pub const DC_PRED: u8 = 2;
pub const DIAG_DOWN_LEFT_PRED: u8 = 3;
pub const DIAG_DOWN_RIGHT_PRED: u8 = 4;
pub const VERT_RIGHT_PRED: u8 = 5;
pub const HOR_DOWN_PRED: u8 = 6;
pub const VERT_LEFT_PRED: u8 = 7;
pub const HOR_UP_PRED: u8 = 8;
pub const TM_PRED: u8 = 9;
pub const NEARESTMV: u8 = 10;
pub const NEARMV: u8 = 11;
pub const ZEROMV: u8 = 12;
pub const NEWMV: u8 = 13;

/// 8x8-unit block dimensions `[w, h]`, and the same halved for chroma with
/// 4:2:0 subsampling, indexed by block size.
pub const BWH_TAB: [[[u8; 2]; 13]; 2] = [
    [
        [8, 8],
        [8, 4],
        [4, 8],
        [4, 4],
        [4, 2],
        [2, 4],
        [2, 2],
        [2, 1],
        [1, 2],
        [1, 1],
        [1, 1],
        [1, 1],
        [1, 1],
    ],
    [
        [4, 4],
        [4, 2],
        [2, 4],
        [2, 2],
        [2, 1],
        [1, 2],
        [1, 1],
        [1, 1],
        [1, 1],
        [1, 1],
        [1, 1],
        [1, 1],
        [1, 1],
    ],
];

// Trees walked by `RangeCoder::get_tree`: positive entries are node
// indices, non-positive entries negated leaf symbols.

pub const PARTITION_TREE: [[i8; 2]; 3] = [
    [0, 1], // '0' = none
    [-1, 2],
    [-2, -3],
];

pub const SEGMENTATION_TREE: [[i8; 2]; 7] = [
    [1, 2],
    [3, 4],
    [5, 6],
    [0, -1],
    [-2, -3],
    [-4, -5],
    [-6, -7],
];

pub const INTRA_MODE_TREE: [[i8; 2]; 9] = [
    [-(DC_PRED as i8), 1],
    [-(TM_PRED as i8), 2],
    [-(VERT_PRED as i8), 3],
    [4, 6],
    [-(HOR_PRED as i8), 5],
    [-(DIAG_DOWN_RIGHT_PRED as i8), -(VERT_RIGHT_PRED as i8)],
    [-(DIAG_DOWN_LEFT_PRED as i8), 7],
    [-(VERT_LEFT_PRED as i8), 8],
    [-(HOR_DOWN_PRED as i8), -(HOR_UP_PRED as i8)],
];

/// Leaves are `mode - NEARESTMV`.
pub const INTER_MODE_TREE: [[i8; 2]; 3] = [
    [-((ZEROMV - NEARESTMV) as i8), 1],
    [0, 2],
    [-((NEARMV - NEARESTMV) as i8), -((NEWMV - NEARESTMV) as i8)],
];

pub const FILTER_TREE: [[i8; 2]; 2] = [[0, 1], [-1, -2]];

/// Tree symbol order to filter bank: regular, smooth, sharp.
pub const FILTER_LUT: [u8; 3] = [1, 0, 2];

pub const MV_JOINT_TREE: [[i8; 2]; 3] = [
    [0, 1], // zero
    [-1, 2],
    [-2, -3],
];

pub const MV_CLASS_TREE: [[i8; 2]; 10] = [
    [0, 1],
    [-1, 2],
    [3, 4],
    [-2, -3],
    [5, 6],
    [-4, -5],
    [-6, 7],
    [8, 9],
    [-7, -8],
    [-9, -10],
];

pub const MV_FP_TREE: [[i8; 2]; 3] = [[0, 1], [-1, 2], [-2, -3]];

/// Transform type implied by the intra prediction mode (inter blocks always
/// use DCT in both directions). Indexed by the unified mode numbering.
pub const INTRA_TXFM_TYPE: [u8; 14] = [
    2, // vert: ADST rows, DCT cols
    1, // hor: DCT rows, ADST cols
    0, // dc
    0, // diag down-left
    3, // diag down-right
    2, // vert-right
    1, // hor-down
    2, // vert-left
    1, // hor-up
    3, // tm
    0, 0, 0, 0, // inter modes
];

/// Block-size group used to pick y-mode probabilities on inter frames.
pub const SIZE_GROUP: [u8; 13] = [3, 3, 3, 3, 2, 2, 2, 1, 1, 1, 0, 0, 0];

/// Inter-mode context from the above/left unified mode bytes.
pub const INTER_MODE_CTX_LUT: [[u8; 14]; 14] = {
    let mut lut = [[5u8; 14]; 14];
    let mut a = 0;
    while a < 14 {
        let mut l = 0;
        while l < 14 {
            lut[a][l] = if a < 10 && l < 10 {
                6
            } else if a < 10 || l < 10 {
                5
            } else {
                // both inter
                const SUB: [[u8; 4]; 4] = [[2, 2, 1, 3], [2, 2, 1, 3], [1, 1, 0, 3], [3, 3, 3, 4]];
                SUB[(a - 10) as usize][(l - 10) as usize]
            };
            l += 1;
        }
        a += 1;
    }
    lut
};

/// Spatial MV candidate offsets `(col, row)` per block size.
pub const MV_REF_BLK_OFF: [[[i8; 2]; 8]; 13] = [
    // 64x64
    [[3, -1], [-1, 3], [4, -1], [-1, 4], [-1, -1], [0, -1], [-1, 0], [6, -1]],
    // 64x32
    [[0, -1], [-1, 0], [4, -1], [-1, 2], [-1, -1], [0, -3], [-3, 0], [2, -1]],
    // 32x64
    [[-1, 0], [0, -1], [-1, 4], [2, -1], [-1, -1], [-3, 0], [0, -3], [-1, 2]],
    // 32x32
    [[1, -1], [-1, 1], [2, -1], [-1, 2], [-1, -1], [0, -3], [-3, 0], [-3, -3]],
    // 32x16
    [[0, -1], [-1, 0], [2, -1], [-1, -1], [-1, 1], [0, -3], [-3, 0], [-3, -3]],
    // 16x32
    [[-1, 0], [0, -1], [-1, 2], [-1, -1], [1, -1], [-3, 0], [0, -3], [-3, -3]],
    // 16x16
    [[0, -1], [-1, 0], [1, -1], [-1, 1], [-1, -1], [0, -3], [-3, 0], [-3, -3]],
    // 16x8
    [[0, -1], [-1, 0], [1, -1], [-1, -1], [0, -2], [-2, 0], [-2, -1], [-1, -2]],
    // 8x16
    [[-1, 0], [0, -1], [-1, 1], [-1, -1], [-2, 0], [0, -2], [-1, -2], [-2, -1]],
    // 8x8
    [[0, -1], [-1, 0], [-1, -1], [0, -2], [-2, 0], [-1, -2], [-2, -1], [-2, -2]],
    // 8x4
    [[0, -1], [-1, 0], [-1, -1], [0, -2], [-2, 0], [-1, -2], [-2, -1], [-2, -2]],
    // 4x8
    [[0, -1], [-1, 0], [-1, -1], [0, -2], [-2, 0], [-1, -2], [-2, -1], [-2, -2]],
    // 4x4
    [[0, -1], [-1, 0], [-1, -1], [0, -2], [-2, 0], [-1, -2], [-2, -1], [-2, -2]],
];

/// Inverse recentering map for differential probability updates. The first
/// 20 entries give coarse steps, the rest walk the remaining values.
pub const INV_MAP_TABLE: [u8; 254] = [
    7, 20, 33, 46, 59, 72, 85, 98, 111, 124, 137, 150, 163, 176, 189, 202, 215, 228, 241, 254, 1,
    2, 3, 4, 5, 6, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 21, 22, 23, 24, 25, 26, 27, 28,
    29, 30, 31, 32, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 47, 48, 49, 50, 51, 52, 53,
    54, 55, 56, 57, 58, 60, 61, 62, 63, 64, 65, 66, 67, 68, 69, 70, 71, 73, 74, 75, 76, 77, 78,
    79, 80, 81, 82, 83, 84, 86, 87, 88, 89, 90, 91, 92, 93, 94, 95, 96, 97, 99, 100, 101, 102,
    103, 104, 105, 106, 107, 108, 109, 110, 112, 113, 114, 115, 116, 117, 118, 119, 120, 121, 122,
    123, 125, 126, 127, 128, 129, 130, 131, 132, 133, 134, 135, 136, 138, 139, 140, 141, 142, 143,
    144, 145, 146, 147, 148, 149, 151, 152, 153, 154, 155, 156, 157, 158, 159, 160, 161, 162, 164,
    165, 166, 167, 168, 169, 170, 171, 172, 173, 174, 175, 177, 178, 179, 180, 181, 182, 183, 184,
    185, 186, 187, 188, 190, 191, 192, 193, 194, 195, 196, 197, 198, 199, 200, 201, 203, 204, 205,
    206, 207, 208, 209, 210, 211, 212, 213, 214, 216, 217, 218, 219, 220, 221, 222, 223, 224, 225,
    226, 227, 229, 230, 231, 232, 233, 234, 235, 236, 237, 238, 239, 240, 242, 243, 244, 245, 246,
    247, 248, 249, 250, 251, 252, 253,
];

pub const DEFAULT_PROBS: ProbContext = ProbContext {
    y_mode: [
        [65, 32, 18, 144, 162, 194, 41, 51, 98],
        [132, 68, 18, 165, 217, 196, 45, 40, 78],
        [173, 80, 19, 176, 240, 193, 64, 35, 46],
        [221, 135, 38, 194, 248, 121, 96, 85, 29],
    ],
    uv_mode: [
        [120, 7, 76, 176, 208, 126, 28, 54, 103],
        [48, 12, 154, 155, 139, 90, 34, 117, 119],
        [67, 6, 25, 204, 243, 158, 13, 21, 96],
        [97, 5, 44, 131, 176, 139, 48, 68, 97],
        [83, 5, 42, 156, 111, 152, 26, 49, 152],
        [80, 5, 58, 178, 74, 83, 33, 62, 145],
        [86, 5, 32, 154, 192, 168, 14, 22, 163],
        [85, 5, 32, 156, 216, 148, 19, 29, 73],
        [77, 7, 64, 116, 132, 122, 37, 126, 120],
        [101, 21, 107, 181, 192, 103, 19, 67, 125],
    ],
    filter: [[235, 162], [36, 255], [34, 3], [149, 144]],
    mv_mode: [
        [2, 173, 34],
        [7, 145, 85],
        [7, 166, 63],
        [7, 94, 66],
        [8, 64, 46],
        [17, 81, 31],
        [25, 29, 30],
    ],
    intra: [9, 102, 187, 225],
    comp: [239, 183, 119, 96, 41],
    single_ref: [[33, 16], [77, 74], [142, 142], [172, 170], [238, 247]],
    comp_ref: [50, 126, 123, 221, 226],
    tx32p: [[3, 136, 37], [5, 52, 13]],
    tx16p: [[20, 152], [15, 101]],
    tx8p: [100, 66],
    skip: [192, 128, 64],
    mv_joint: [32, 64, 96],
    mv_comp: [
        MvComponentProbs {
            sign: 128,
            classes: [224, 144, 192, 168, 192, 176, 192, 198, 198, 245],
            class0: 216,
            bits: [136, 140, 148, 160, 176, 192, 224, 234, 234, 240],
            class0_fp: [[128, 128, 64], [96, 112, 64]],
            fp: [64, 96, 64],
            class0_hp: 160,
            hp: 128,
        },
        MvComponentProbs {
            sign: 128,
            classes: [216, 128, 176, 160, 176, 176, 192, 198, 198, 208],
            class0: 208,
            bits: [136, 140, 148, 160, 176, 192, 224, 234, 234, 240],
            class0_fp: [[128, 128, 64], [96, 112, 64]],
            fp: [64, 96, 64],
            class0_hp: 160,
            hp: 128,
        },
    ],
    partition: [
        // one row of contexts per level, 64x64 first
        [[222, 34, 30], [72, 16, 44], [58, 32, 12], [10, 7, 6]],
        [[177, 58, 59], [68, 26, 63], [52, 79, 25], [17, 14, 12]],
        [[174, 73, 87], [92, 41, 83], [82, 99, 50], [53, 39, 39]],
        [
            [199, 122, 141],
            [147, 63, 159],
            [148, 133, 118],
            [121, 104, 114],
        ],
    ],
};

/// Keyframe partition probabilities, `[level][context][node]`, 64x64 first.
pub const KF_PARTITION_PROBS: [[[u8; 3]; 4]; 4] = [
    [[174, 35, 49], [68, 11, 27], [57, 15, 54], [38, 13, 29]],
    [[150, 40, 39], [78, 12, 26], [67, 33, 11], [24, 7, 5]],
    [[149, 53, 53], [94, 20, 48], [83, 53, 24], [52, 18, 18]],
    [[158, 97, 94], [93, 24, 99], [85, 119, 131], [62, 59, 75]],
];

/// Keyframe y-mode probabilities, `[above mode][left mode][node]`.
pub static KF_YMODE_PROBS: Lazy<[[[u8; 9]; 10]; 10]> = Lazy::new(|| {
    // the anchor rows carry the dominant statistics; the remaining entries
    // blend towards the left-mode anchor as the above mode weakens
    const ANCHOR: [[u8; 9]; 10] = [
        [98, 16, 45, 130, 160, 169, 60, 67, 77],   // vert
        [67, 24, 28, 102, 83, 156, 56, 113, 128],  // hor
        [137, 30, 42, 148, 151, 207, 70, 52, 91],  // dc
        [104, 14, 36, 90, 186, 165, 48, 57, 64],   // d45
        [85, 22, 43, 126, 135, 198, 86, 74, 99],   // d135
        [82, 26, 44, 124, 118, 193, 96, 86, 105],  // d117
        [88, 24, 40, 135, 144, 201, 78, 67, 110],  // d153
        [92, 19, 41, 119, 163, 184, 62, 61, 85],   // d207
        [93, 17, 40, 112, 168, 176, 56, 66, 71],   // d63
        [70, 34, 58, 125, 130, 165, 63, 88, 143],  // tm
    ];
    let mut t = [[[0u8; 9]; 10]; 10];
    for a in 0..10 {
        for l in 0..10 {
            for n in 0..9 {
                let va = u16::from(ANCHOR[a][n]);
                let vl = u16::from(ANCHOR[l][n]);
                t[a][l][n] = (((3 * va + vl) / 4) as u8).max(1);
            }
        }
    }
    t
});

/// Keyframe uv-mode probabilities, `[y mode][node]`.
pub const KF_UVMODE_PROBS: [[u8; 9]; 10] = [
    [160, 7, 54, 151, 223, 161, 27, 57, 109],
    [102, 19, 126, 135, 166, 107, 27, 120, 140],
    [144, 11, 54, 157, 195, 130, 46, 58, 108],
    [128, 8, 54, 129, 199, 150, 35, 61, 100],
    [115, 8, 56, 146, 144, 156, 32, 60, 123],
    [110, 8, 62, 159, 119, 114, 35, 64, 131],
    [118, 8, 50, 148, 183, 152, 25, 52, 130],
    [120, 8, 50, 152, 208, 148, 28, 57, 92],
    [110, 9, 68, 130, 155, 138, 36, 117, 112],
    [126, 19, 101, 164, 186, 117, 28, 65, 122],
];

/// Default coefficient-token models, `[tx size][plane][inter][band][ctx]`,
/// three nodes each (end-of-block, zero, one). The DC band only has three
/// contexts; its remaining slots stay zero and are never read.
pub static DEFAULT_COEF_PROBS: Lazy<[[[CoefProbs; 2]; 2]; 4]> = Lazy::new(|| {
    // per-band spines for a luma intra 4x4 block; other combinations are
    // derived by damping towards the band mean as tx size grows and for
    // chroma/inter blocks
    const SPINE: [[[u8; 3]; 6]; 6] = [
        [
            [195, 29, 183],
            [84, 49, 136],
            [8, 42, 71],
            [0, 0, 0],
            [0, 0, 0],
            [0, 0, 0],
        ],
        [
            [31, 107, 169],
            [35, 99, 159],
            [17, 82, 140],
            [8, 66, 114],
            [2, 44, 76],
            [1, 19, 32],
        ],
        [
            [40, 132, 201],
            [29, 114, 187],
            [13, 91, 157],
            [7, 75, 127],
            [3, 58, 95],
            [1, 28, 47],
        ],
        [
            [69, 142, 221],
            [42, 122, 201],
            [15, 91, 159],
            [6, 67, 121],
            [1, 42, 77],
            [1, 17, 31],
        ],
        [
            [102, 148, 228],
            [67, 117, 204],
            [17, 82, 154],
            [6, 59, 114],
            [2, 39, 75],
            [1, 15, 29],
        ],
        [
            [156, 57, 233],
            [119, 57, 212],
            [58, 48, 163],
            [29, 40, 124],
            [12, 30, 81],
            [3, 12, 31],
        ],
    ];
    let damp = |v: u8, steps: u32| -> u8 {
        let mut x = u32::from(v);
        for _ in 0..steps {
            x = (3 * x + 128) / 4;
        }
        (x as u8).max(1)
    };
    let mut t = [[[CoefProbs::default(); 2]; 2]; 4];
    for (tx, t_tx) in t.iter_mut().enumerate() {
        for (pl, t_pl) in t_tx.iter_mut().enumerate() {
            for (inter, probs) in t_pl.iter_mut().enumerate() {
                let steps = tx as u32 / 2 + pl as u32 + inter as u32;
                for band in 0..6 {
                    let n_ctx = if band == 0 { 3 } else { 6 };
                    for ctx in 0..n_ctx {
                        for node in 0..3 {
                            probs.0[band][ctx][node] = damp(SPINE[band][ctx][node], steps);
                        }
                    }
                }
            }
        }
    }
    t
});

/// Extension of the three coded token probabilities to the full cascade:
/// row `p` (the "one" node probability minus one) gives the eight
/// conditional probabilities for tokens two and up, following the Pareto
/// tail model used by the format.
pub static MODEL_PARETO8: Lazy<[[u8; 8]; 256]> = Lazy::new(|| {
    let mut t = [[0u8; 8]; 256];
    const ALPHA: f64 = 0.85;
    for (i, row) in t.iter_mut().enumerate() {
        // survival function of the magnitude tail; a stronger "one" node
        // model (higher row index) means a thinner tail
        let p = 1.0 - (i as f64 + 0.5) / 256.0;
        let beta = p.max(1e-4);
        let surv = |x: f64| -> f64 { (beta / (x + beta)).powf(1.0 / ALPHA) };
        // conditional node probabilities of the token tree over magnitudes
        let cond = |lo: f64, hi: f64, split: f64| -> f64 {
            let total = surv(lo) - surv(hi);
            if total <= 0.0 {
                0.5
            } else {
                (surv(lo) - surv(split)) / total
            }
        };
        let big = 1e9;
        row[0] = prob_to_u8(1.0 - surv(1.0) / surv(0.0)); // two vs larger
        row[1] = prob_to_u8(cond(1.0, 3.0, 2.0)); // three / four
        row[2] = prob_to_u8(cond(2.0, 3.0, 2.5));
        row[3] = prob_to_u8(cond(3.0, big, 7.0)); // cat1/2 vs cat3+
        row[4] = prob_to_u8(cond(3.0, 7.0, 5.0));
        row[5] = prob_to_u8(cond(7.0, big, 19.0));
        row[6] = prob_to_u8(cond(7.0, 19.0, 11.0));
        row[7] = prob_to_u8(cond(19.0, big, 67.0));
    }
    t
});

fn prob_to_u8(p: f64) -> u8 {
    ((p * 256.0).round() as i32).clamp(1, 255) as u8
}

/// Coefficient bands: scan positions per band for each transform size.
pub const BAND_COUNTS: [[i16; 7]; 4] = [
    [1, 2, 3, 4, 3, 16 - 13, 0],
    [1, 2, 3, 4, 11, 64 - 21, 0],
    [1, 2, 3, 4, 11, 256 - 21, 0],
    [1, 2, 3, 4, 11, 1024 - 21, 0],
];

/// Scan orders and their neighbor-context tables, `[tx size][tx type]`.
/// Type index: 0 = both DCT, 1 = vertical ADST, 2 = horizontal ADST,
/// 3 = both ADST (which shares the default order).
pub struct ScanSet {
    pub scan: Vec<i16>,
    /// raster positions of the two already-decoded neighbors consulted for
    /// the context of scan position `i + 1`
    pub nb: Vec<[i16; 2]>,
}

pub static SCANS: Lazy<[[ScanSet; 4]; 4]> = Lazy::new(|| {
    [
        build_scan_size(4),
        build_scan_size(8),
        build_scan_size(16),
        build_scan_size(32),
    ]
});

fn build_scan_size(n: usize) -> [ScanSet; 4] {
    let default = build_scan(n, 1, 1);
    let col = build_scan(n, 4, 1); // column-biased, for vertical ADST
    let row = build_scan(n, 1, 4); // row-biased, for horizontal ADST
    let both = build_scan(n, 1, 1);
    [default, col, row, both]
}

/// Diagonal scan with a directional bias; the 4x4 orders are the canonical
/// ones, larger sizes follow the same construction.
fn build_scan(n: usize, row_w: usize, col_w: usize) -> ScanSet {
    let scan: Vec<i16> = if n == 4 && row_w == col_w {
        vec![0, 4, 1, 5, 8, 2, 12, 9, 6, 13, 3, 10, 7, 14, 11, 15]
    } else if n == 4 && row_w > col_w {
        vec![0, 4, 8, 1, 12, 5, 9, 2, 13, 6, 10, 3, 7, 14, 11, 15]
    } else if n == 4 {
        vec![0, 1, 4, 2, 5, 8, 3, 6, 9, 12, 7, 10, 13, 11, 14, 15]
    } else {
        let mut idx: Vec<usize> = (0..n * n).collect();
        idx.sort_by_key(|&p| {
            let (r, c) = (p / n, p % n);
            (row_w * r + col_w * c) * n + if row_w >= col_w { r } else { c }
        });
        idx.iter().map(|&p| p as i16).collect()
    };

    // inverse permutation, to know when a raster neighbor is already decoded
    let mut order = vec![0usize; n * n];
    for (i, &p) in scan.iter().enumerate() {
        order[p as usize] = i;
    }
    let mut nb = vec![[0i16; 2]; n * n];
    for i in 0..n * n - 1 {
        let p = scan[i + 1] as usize;
        let (r, c) = (p / n, p % n);
        let above = if r > 0 { Some(p - n) } else { None };
        let left = if c > 0 { Some(p - 1) } else { None };
        nb[i] = match (above, left) {
            (Some(a), Some(l)) => {
                debug_assert!(order[a] <= i && order[l] <= i);
                [a as i16, l as i16]
            }
            (Some(a), None) => [a as i16, a as i16],
            (None, Some(l)) => [l as i16, l as i16],
            (None, None) => [0, 0],
        };
    }
    ScanSet { scan, nb }
}

/// Quantizer lookups for 8-bit content. The curves run from 4 up to the
/// format maxima (1336 DC, 1828 AC) and are strictly monotone.
pub static DC_QLOOKUP: Lazy<[i16; 256]> = Lazy::new(|| build_qlookup(1336.0));
pub static AC_QLOOKUP: Lazy<[i16; 256]> = Lazy::new(|| build_qlookup(1828.0));

fn build_qlookup(max: f64) -> [i16; 256] {
    let mut t = [0i16; 256];
    let ratio = (max / 4.0).ln() / 255.0;
    let mut prev = 3i16;
    for (i, q) in t.iter_mut().enumerate() {
        let v = (4.0 * (ratio * i as f64).exp()).round() as i16;
        *q = v.max(prev + 1);
        prev = *q;
    }
    t[255] = max as i16;
    t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trees_reach_every_leaf() {
        fn leaves(tree: &[[i8; 2]]) -> Vec<usize> {
            let mut out = Vec::new();
            let mut stack = vec![0i8];
            let mut first = true;
            while let Some(i) = stack.pop() {
                if i > 0 || first {
                    first = false;
                    stack.push(tree[i as usize][0]);
                    stack.push(tree[i as usize][1]);
                } else {
                    out.push((-i) as usize);
                }
            }
            out.sort_unstable();
            out
        }
        assert_eq!(leaves(&PARTITION_TREE), vec![0, 1, 2, 3]);
        assert_eq!(leaves(&MV_JOINT_TREE), vec![0, 1, 2, 3]);
        assert_eq!(leaves(&SEGMENTATION_TREE), (0..8).collect::<Vec<_>>());
        assert_eq!(leaves(&MV_CLASS_TREE), (0..11).collect::<Vec<_>>());
        let mut intra = leaves(&INTRA_MODE_TREE);
        intra.dedup();
        assert_eq!(intra, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn scans_are_permutations() {
        for size in SCANS.iter() {
            for set in size.iter() {
                let n = set.scan.len();
                let mut seen = vec![false; n];
                for &p in &set.scan {
                    assert!(!seen[p as usize]);
                    seen[p as usize] = true;
                }
                assert!(seen.iter().all(|&s| s));
                // first scanned coefficient is always DC
                assert_eq!(set.scan[0], 0);
            }
        }
    }

    #[test]
    fn scan_neighbors_already_decoded() {
        for size in SCANS.iter() {
            for set in size.iter() {
                let n = set.scan.len();
                let mut order = vec![0usize; n];
                for (i, &p) in set.scan.iter().enumerate() {
                    order[p as usize] = i;
                }
                for i in 0..n - 1 {
                    for &nbp in &set.nb[i] {
                        assert!(order[nbp as usize] <= i);
                    }
                }
            }
        }
    }

    #[test]
    fn qlookup_monotone() {
        assert_eq!(DC_QLOOKUP[0], 4);
        assert_eq!(AC_QLOOKUP[0], 4);
        assert_eq!(AC_QLOOKUP[255], 1828);
        assert_eq!(DC_QLOOKUP[255], 1336);
        for i in 1..256 {
            assert!(DC_QLOOKUP[i] > DC_QLOOKUP[i - 1]);
            assert!(AC_QLOOKUP[i] > AC_QLOOKUP[i - 1]);
        }
    }

    #[test]
    fn pareto_rows_monotone_in_model() {
        // a stronger "one" node prior must not make big tokens more likely
        let lo = MODEL_PARETO8[10];
        let hi = MODEL_PARETO8[250];
        assert!(lo[0] <= hi[0]);
        for row in MODEL_PARETO8.iter() {
            for &p in row {
                assert!(p >= 1);
            }
        }
    }

    #[test]
    fn inv_map_covers_all_values() {
        let mut seen = [false; 255];
        for &v in INV_MAP_TABLE.iter() {
            assert!(!seen[v as usize - 1], "duplicate {}", v);
            seen[v as usize - 1] = true;
        }
        assert_eq!(seen.iter().filter(|&&s| s).count(), 254);
    }
}
