// crates/hi_stages/src/surface.rs

//! 冻结面模型
//!
//! 流体描述向粒子描述过渡的超曲面，离散化为单元集合。
//! 每个单元携带位置、超曲面法向与横向流速；剪切/体粘修正
//! 依采样配置可选携带。
//!
//! # 文件布局（16 列）
//!
//! ```text
//! [0..3]   位置 (tau, x, y)
//! [3..6]   超曲面法向 sigma
//! [6..8]   横向流速 (vx, vy)
//! [8..11]  引擎内部项（忽略）
//! [11..15] 剪切张量 (pi11, pi12, pi22, pi33)
//! [15]     体粘压强 Pi
//! ```

use glam::DVec2;
use ndarray::Array2;

use crate::outcome::StageError;

/// 流体面输出的固定列宽
pub const SURFACE_COLS: usize = 16;

/// 冻结面单元
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceCell {
    /// 固有时 tau [fm/c]
    pub tau: f64,
    /// 横向位置 (x, y) [fm]
    pub position: DVec2,
    /// 超曲面法向
    pub sigma: [f64; 3],
    /// 横向流速
    pub velocity: DVec2,
    /// 剪切张量分量 (pi11, pi12, pi22, pi33)
    pub pi: [f64; 4],
    /// 体粘压强
    pub bulk: f64,
}

/// 冻结面
///
/// 由精细遍流体输出一次构建，事件内不可变，被采样循环消费后释放。
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    /// 单元集合
    pub cells: Vec<SurfaceCell>,
    /// 是否携带剪切修正
    pub shear: bool,
    /// 是否携带体粘修正
    pub bulk: bool,
}

impl Surface {
    /// 由引擎输出矩阵构建
    ///
    /// 被禁用的粘性修正在构建时清零，下游采样器不再区分。
    pub fn from_rows(rows: &Array2<f64>, shear: bool, bulk: bool) -> Result<Self, StageError> {
        if rows.ncols() != SURFACE_COLS {
            return Err(StageError::MalformedOutput {
                path: "surface.dat".into(),
                reason: format!("列宽 {} != {}", rows.ncols(), SURFACE_COLS),
            });
        }

        let cells = rows
            .rows()
            .into_iter()
            .map(|r| SurfaceCell {
                tau: r[0],
                position: DVec2::new(r[1], r[2]),
                sigma: [r[3], r[4], r[5]],
                velocity: DVec2::new(r[6], r[7]),
                pi: if shear {
                    [r[11], r[12], r[13], r[14]]
                } else {
                    [0.0; 4]
                },
                bulk: if bulk { r[15] } else { 0.0 },
            })
            .collect();

        Ok(Self { cells, shear, bulk })
    }

    /// 单元数
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// 横向最大半径: `sqrt(max(x^2 + y^2))`
    ///
    /// 粗网格遍用它确定精细遍所需的物理范围。
    pub fn rmax(&self) -> f64 {
        self.cells
            .iter()
            .map(|c| c.position.length_squared())
            .fold(0.0, f64::max)
            .sqrt()
    }

    /// 展平为采样器输入矩阵（与文件布局一致）
    pub fn to_rows(&self) -> Array2<f64> {
        let mut rows = Array2::zeros((self.cells.len(), SURFACE_COLS));
        for (i, c) in self.cells.iter().enumerate() {
            let mut row = rows.row_mut(i);
            row[0] = c.tau;
            row[1] = c.position.x;
            row[2] = c.position.y;
            row[3] = c.sigma[0];
            row[4] = c.sigma[1];
            row[5] = c.sigma[2];
            row[6] = c.velocity.x;
            row[7] = c.velocity.y;
            row[11] = c.pi[0];
            row[12] = c.pi[1];
            row[13] = c.pi[2];
            row[14] = c.pi[3];
            row[15] = c.bulk;
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_rows() -> Array2<f64> {
        let mut rows = Array2::zeros((2, SURFACE_COLS));
        // 单元 0: r = (3, 4) -> |r| = 5
        rows[[0, 0]] = 1.0;
        rows[[0, 1]] = 3.0;
        rows[[0, 2]] = 4.0;
        rows[[0, 11]] = 0.5;
        rows[[0, 15]] = 0.2;
        // 单元 1: r = (1, 1)
        rows[[1, 1]] = 1.0;
        rows[[1, 2]] = 1.0;
        rows
    }

    #[test]
    fn test_rmax() {
        let surface = Surface::from_rows(&test_rows(), true, true).unwrap();
        assert!((surface.rmax() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_disabled_viscous_terms_zeroed() {
        let surface = Surface::from_rows(&test_rows(), false, false).unwrap();
        assert_eq!(surface.cells[0].pi, [0.0; 4]);
        assert_eq!(surface.cells[0].bulk, 0.0);

        let with_visc = Surface::from_rows(&test_rows(), true, true).unwrap();
        assert_eq!(with_visc.cells[0].pi[0], 0.5);
        assert_eq!(with_visc.cells[0].bulk, 0.2);
    }

    #[test]
    fn test_wrong_width_rejected() {
        let rows = Array2::zeros((1, 8));
        assert!(Surface::from_rows(&rows, true, false).is_err());
    }

    #[test]
    fn test_to_rows_roundtrip() {
        let surface = Surface::from_rows(&test_rows(), true, true).unwrap();
        let back = Surface::from_rows(&surface.to_rows(), true, true).unwrap();
        assert_eq!(back.cells, surface.cells);
    }
}
