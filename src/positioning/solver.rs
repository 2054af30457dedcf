/// 平面位置求解器
///
/// 将多边定位表述为圆交最小二乘问题：
/// 残差 r_i = d_i^2 - ||p - x_i||^2，权重 w_i = 1 / d_i^2（近距信标更可信）。
/// 采用 Levenberg-Marquardt（信赖域阻尼高斯-牛顿）求解，
/// 内部使用带列主元的 Householder QR 分解处理可能秩亏的线性子问题，
/// 参照经典 MINPACK lmder/qrsolv 方案。

use thiserror::Error;

use crate::positioning::results::Location2D;

const MAX_EVALUATIONS: usize = 1000;
const MAX_ITERATIONS: usize = 1000;

const INITIAL_STEP_BOUND_FACTOR: f64 = 100.0;
const ORTHO_TOLERANCE: f64 = 1.0e-10;
const COST_RELATIVE_TOLERANCE: f64 = 1.0e-10;
const PAR_RELATIVE_TOLERANCE: f64 = 1.0e-10;
const TWO_EPS: f64 = 2.220446049250313e-16;
const SAFE_MIN: f64 = 2.2250738585072014e-308;

/// 求解失败的具体原因
///
/// 对调用方而言任何失败都意味着本周期没有位置估计，
/// 但保留具体类别以便区分"数据不足"与"数值不稳定"。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SolveError {
    #[error("至少需要 3 组坐标与距离")]
    InsufficientInput,
    #[error("坐标与距离数量不一致")]
    LengthMismatch,
    #[error("坐标维度不一致")]
    DimensionMismatch,
    #[error("超过最大评估次数仍未收敛")]
    MaxEvaluations,
    #[error("超过最大迭代次数仍未收敛")]
    MaxIterations,
    #[error("代价相对容差已到机器精度下限")]
    CostRelativeTolerance,
    #[error("参数相对容差已到机器精度下限")]
    ParRelativeTolerance,
    #[error("正交性容差已到机器精度下限")]
    OrthoTolerance,
}

/// 求解器的瞬态输入：并行的坐标序列与距离序列
#[derive(Clone, Debug, Default)]
pub struct SolverProblem {
    pub positions: Vec<Vec<f64>>,
    pub distances: Vec<f64>,
}

impl SolverProblem {
    pub fn new() -> Self {
        SolverProblem::default()
    }

    /// 追加一组 (坐标, 距离)
    pub fn push(&mut self, position: Vec<f64>, distance: f64) {
        self.positions.push(position);
        self.distances.push(distance);
    }

    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }
}

/// 求解平面位置的便捷入口
pub fn solve_location(problem: &SolverProblem) -> Result<Location2D, SolveError> {
    let solver = PositionSolver::new(problem.positions.clone(), problem.distances.clone());
    let point = solver.solve()?;
    if point.len() != 2 {
        return Err(SolveError::DimensionMismatch);
    }
    Ok(Location2D::new(point[0], point[1]))
}

/// 一次目标函数求值
#[derive(Clone)]
struct Evaluation {
    jacobian: Vec<Vec<f64>>,
    residuals: Vec<f64>,
    point: Vec<f64>,
}

/// QR 分解的中间数据
struct InternalData {
    weighted_jacobian: Vec<Vec<f64>>,
    permutation: Vec<usize>,
    rank: usize,
    diag_r: Vec<f64>,
    jac_norm: Vec<f64>,
    beta: Vec<f64>,
}

/// 非线性最小二乘位置求解器
pub struct PositionSolver {
    positions: Vec<Vec<f64>>,
    distances: Vec<f64>,
}

impl PositionSolver {
    pub fn new(positions: Vec<Vec<f64>>, distances: Vec<f64>) -> Self {
        PositionSolver {
            positions,
            distances,
        }
    }

    /// 求解最优点
    ///
    /// 输入不足 3 组、长度不一致或坐标维度不一致时直接拒绝；
    /// 优化器未收敛时返回对应的失败类别，绝不报告未收敛的中间点。
    pub fn solve(&self) -> Result<Vec<f64>, SolveError> {
        if self.positions.len() < 3 || self.distances.len() < 3 {
            return Err(SolveError::InsufficientInput);
        }
        if self.positions.len() != self.distances.len() {
            return Err(SolveError::LengthMismatch);
        }

        let number_of_positions = self.positions.len();
        let position_dimension = self.positions[0].len();
        for coordinate in &self.positions {
            if coordinate.len() != position_dimension {
                return Err(SolveError::DimensionMismatch);
            }
        }

        // 初始点取所有坐标的均值
        let mut initial_point = vec![0.0; position_dimension];
        for vertex in &self.positions {
            for j in 0..vertex.len() {
                initial_point[j] += vertex[j];
            }
        }
        for value in initial_point.iter_mut() {
            *value /= number_of_positions as f64;
        }

        // 平方反比权重
        let weight_square_root: Vec<f64> = self
            .distances
            .iter()
            .map(|distance| (1.0 / (distance * distance)).sqrt())
            .collect();

        let evaluation = self.optimize(&initial_point, &weight_square_root)?;
        Ok(evaluation.point)
    }

    // ========================================================================
    // Levenberg-Marquardt 主循环
    // ========================================================================

    fn optimize(
        &self,
        start: &[f64],
        weight_square_root: &[f64],
    ) -> Result<Evaluation, SolveError> {
        let n_r = self.distances.len(); // 观测数量
        let n_c = start.len(); // 参数数量
        let mut iteration_counter = 0usize;
        let mut evaluation_counter = 1usize;

        let solved_cols = n_r.min(n_c);
        let mut lm_par = 0.0;
        let mut lm_dir = vec![0.0; n_c];

        let mut delta = 0.0;
        let mut x_norm = 0.0;
        let mut diag = vec![0.0; n_c];
        let mut old_x = vec![0.0; n_c];
        let mut old_res = vec![0.0; n_r];
        let mut qtf = vec![0.0; n_r];
        let mut work1 = vec![0.0; n_c];
        let mut work2 = vec![0.0; n_c];
        let mut work3 = vec![0.0; n_c];

        // 在起始点求值
        let mut current_point = start.to_vec();
        let mut current = Evaluation {
            jacobian: self.jacobian(&current_point),
            residuals: self.value(&current_point),
            point: current_point.clone(),
        };
        let mut current_residuals = weighted_residuals(&current.residuals, weight_square_root);
        let mut current_cost = cost(&current_residuals);

        let mut first_iteration = true;
        loop {
            iteration_counter += 1;
            if iteration_counter > MAX_ITERATIONS {
                return Err(SolveError::MaxIterations);
            }

            let previous = current.clone();

            // 雅可比矩阵的 QR 分解
            let mut internal =
                qr_decomposition(&current.jacobian, weight_square_root, solved_cols);

            // 残差已带权重
            let mut weighted_residual = current_residuals.clone();
            qtf[..n_r].copy_from_slice(&weighted_residual);

            // 计算 Qt.res
            q_t_y(&mut qtf, &internal);

            // Q 不再需要，让雅可比持有带对角元的 R 矩阵
            for k in 0..solved_cols {
                let pk = internal.permutation[k];
                internal.weighted_jacobian[k][pk] = internal.diag_r[pk];
            }

            if first_iteration {
                // 按初始雅可比的列范数缩放当前点
                x_norm = 0.0;
                for k in 0..n_c {
                    let mut dk = internal.jac_norm[k];
                    if dk == 0.0 {
                        dk = 1.0;
                    }
                    let xk = dk * current_point[k];
                    x_norm += xk * xk;
                    diag[k] = dk;
                }
                x_norm = x_norm.sqrt();
                // 初始化步长边界 delta
                delta = if x_norm == 0.0 {
                    INITIAL_STEP_BOUND_FACTOR
                } else {
                    INITIAL_STEP_BOUND_FACTOR * x_norm
                };
            }

            // 检查函数向量与雅可比各列的正交性
            let mut max_cosine = 0.0f64;
            if current_cost != 0.0 {
                for j in 0..solved_cols {
                    let pj = internal.permutation[j];
                    let s = internal.jac_norm[pj];
                    if s != 0.0 {
                        let mut sum = 0.0;
                        for i in 0..=j {
                            sum += internal.weighted_jacobian[i][pj] * qtf[i];
                        }
                        max_cosine = max_cosine.max(sum.abs() / (s * current_cost));
                    }
                }
            }
            if max_cosine <= ORTHO_TOLERANCE {
                // 已收敛
                return Ok(current);
            }

            // 必要时重新缩放
            for j in 0..n_c {
                diag[j] = diag[j].max(internal.jac_norm[j]);
            }

            // 内循环
            let mut ratio = 0.0;
            while ratio < 1.0e-4 {
                // 保存状态
                for j in 0..solved_cols {
                    let pj = internal.permutation[j];
                    old_x[pj] = current_point[pj];
                }
                let previous_cost = current_cost;
                std::mem::swap(&mut weighted_residual, &mut old_res);

                // 确定 Levenberg-Marquardt 参数
                lm_par = determine_lm_parameter(
                    &qtf,
                    delta,
                    &diag,
                    &internal,
                    solved_cols,
                    &mut work1,
                    &mut work2,
                    &mut work3,
                    &mut lm_dir,
                    lm_par,
                );

                // 计算新点与演化方向的范数
                let mut lm_norm = 0.0;
                for j in 0..solved_cols {
                    let pj = internal.permutation[j];
                    lm_dir[pj] = -lm_dir[pj];
                    current_point[pj] = old_x[pj] + lm_dir[pj];
                    let s = diag[pj] * lm_dir[pj];
                    lm_norm += s * s;
                }
                lm_norm = lm_norm.sqrt();

                // 首轮迭代时调整初始步长边界
                if first_iteration {
                    delta = delta.min(lm_norm);
                }

                // 在 x + p 处求值
                evaluation_counter += 1;
                if evaluation_counter > MAX_EVALUATIONS {
                    return Err(SolveError::MaxEvaluations);
                }
                current = Evaluation {
                    jacobian: self.jacobian(&current_point),
                    residuals: self.value(&current_point),
                    point: current_point.clone(),
                };
                current_residuals = weighted_residuals(&current.residuals, weight_square_root);
                current_cost = cost(&current_residuals);

                // 缩放后的实际削减量
                let mut act_red = -1.0;
                if 0.1 * current_cost < previous_cost {
                    let r = current_cost / previous_cost;
                    act_red = 1.0 - r * r;
                }

                // 缩放后的预测削减量与方向导数
                for j in 0..solved_cols {
                    let pj = internal.permutation[j];
                    let dir_j = lm_dir[pj];
                    work1[j] = 0.0;
                    for i in 0..=j {
                        work1[i] += internal.weighted_jacobian[i][pj] * dir_j;
                    }
                }
                let mut coeff1 = 0.0;
                for item in work1.iter().take(solved_cols) {
                    coeff1 += item * item;
                }
                let pc2 = previous_cost * previous_cost;
                coeff1 /= pc2;
                let coeff2 = lm_par * lm_norm * lm_norm / pc2;
                let pre_red = coeff1 + 2.0 * coeff2;
                let dir_der = -(coeff1 + coeff2);

                // 实际削减与预测削减之比
                ratio = if pre_red == 0.0 { 0.0 } else { act_red / pre_red };

                // 更新步长边界
                if ratio <= 0.25 {
                    let mut tmp = if act_red < 0.0 {
                        0.5 * dir_der / (dir_der + 0.5 * act_red)
                    } else {
                        0.5
                    };
                    if 0.1 * current_cost >= previous_cost || tmp < 0.1 {
                        tmp = 0.1;
                    }
                    delta = tmp * delta.min(10.0 * lm_norm);
                    lm_par /= tmp;
                } else if lm_par == 0.0 || ratio >= 0.75 {
                    delta = 2.0 * lm_norm;
                    lm_par *= 0.5;
                }

                if ratio >= 1.0e-4 {
                    // 迭代成功，更新范数
                    first_iteration = false;
                    x_norm = 0.0;
                    for k in 0..n_c {
                        let xk = diag[k] * current_point[k];
                        x_norm += xk * xk;
                    }
                    x_norm = x_norm.sqrt();
                } else {
                    // 迭代失败，恢复先前的值
                    current_cost = previous_cost;
                    for j in 0..solved_cols {
                        let pj = internal.permutation[j];
                        current_point[pj] = old_x[pj];
                    }
                    std::mem::swap(&mut weighted_residual, &mut old_res);
                    current = previous.clone();
                }

                // 默认收敛判据
                if (act_red.abs() <= COST_RELATIVE_TOLERANCE
                    && pre_red <= COST_RELATIVE_TOLERANCE
                    && ratio <= 2.0)
                    || delta <= PAR_RELATIVE_TOLERANCE * x_norm
                {
                    return Ok(current);
                }

                // 容差已收紧至机器精度的终止检查
                if act_red.abs() <= TWO_EPS && pre_red <= TWO_EPS && ratio <= 2.0 {
                    return Err(SolveError::CostRelativeTolerance);
                } else if delta <= TWO_EPS * x_norm {
                    return Err(SolveError::ParRelativeTolerance);
                } else if max_cosine <= TWO_EPS {
                    return Err(SolveError::OrthoTolerance);
                }
            }
        }
    }

    // ========================================================================
    // 目标函数
    // ========================================================================

    /// 残差对参数的偏导：dr_i/dp_j = 2 p_j - 2 x_ij
    fn jacobian(&self, point: &[f64]) -> Vec<Vec<f64>> {
        let mut jacobian = vec![vec![0.0; point.len()]; self.distances.len()];
        for i in 0..jacobian.len() {
            for j in 0..point.len() {
                jacobian[i][j] = 2.0 * point[j] - 2.0 * self.positions[i][j];
            }
        }
        jacobian
    }

    /// 残差向量：r_i = d_i^2 - ||p - x_i||^2
    fn value(&self, point: &[f64]) -> Vec<f64> {
        let mut result = vec![0.0; self.distances.len()];
        for i in 0..result.len() {
            for j in 0..point.len() {
                let diff = point[j] - self.positions[i][j];
                result[i] += diff * diff;
            }
            result[i] -= self.distances[i] * self.distances[i];
            result[i] = -result[i];
        }
        result
    }
}

fn weighted_residuals(residuals: &[f64], weight_square_root: &[f64]) -> Vec<f64> {
    residuals
        .iter()
        .zip(weight_square_root)
        .map(|(residual, weight)| residual * weight)
        .collect()
}

fn cost(residuals: &[f64]) -> f64 {
    residuals.iter().map(|r| r * r).sum::<f64>().sqrt()
}

// ============================================================================
// 列主元 Householder QR 及其派生运算
// ============================================================================

fn qr_decomposition(
    jacobian: &[Vec<f64>],
    weight_square_root: &[f64],
    solved_cols: usize,
) -> InternalData {
    // 此处约定加权雅可比为 -(W^(1/2) J)，故乘以 -1
    let mut weighted_jacobian: Vec<Vec<f64>> = jacobian
        .iter()
        .enumerate()
        .map(|(index, row)| {
            row.iter()
                .map(|value| value * (-weight_square_root[index]))
                .collect()
        })
        .collect();

    let n_r = weighted_jacobian.len();
    let n_c = weighted_jacobian[0].len();

    let mut permutation: Vec<usize> = (0..n_c).collect();
    let mut diag_r = vec![0.0; n_c];
    let mut jac_norm = vec![0.0; n_c];
    let mut beta = vec![0.0; n_c];

    for k in 0..n_c {
        let mut norm2 = 0.0;
        for row in weighted_jacobian.iter() {
            let akk = row[k];
            norm2 += akk * akk;
        }
        jac_norm[k] = norm2.sqrt();
    }

    // 逐列变换矩阵
    for k in 0..n_c {
        // 在活动分量上选取范数最大的剩余列（并列时取先出现者）
        let mut next_column = None;
        let mut ak2 = f64::NEG_INFINITY;
        for i in k..n_c {
            let mut norm2 = 0.0;
            for j in k..n_r {
                let aki = weighted_jacobian[j][permutation[i]];
                norm2 += aki * aki;
            }
            if norm2 > ak2 {
                next_column = Some(i);
                ak2 = norm2;
            }
        }
        let Some(next_column) = next_column else { break };
        let pk = permutation[next_column];
        permutation[next_column] = permutation[k];
        permutation[k] = pk;

        // 选择 alpha 使 Hk.u = alpha ek，符号避免相消
        let akk = weighted_jacobian[k][pk];
        let alpha = if akk > 0.0 { -ak2.sqrt() } else { ak2.sqrt() };
        let betak = 1.0 / (ak2 - akk * alpha);
        beta[pk] = betak;

        // 变换当前列
        diag_r[pk] = alpha;
        weighted_jacobian[k][pk] -= alpha;

        for dk in (1..=(n_c - 1 - k)).rev() {
            let column = permutation[k + dk];
            let mut gamma = 0.0;
            for j in k..n_r {
                gamma += weighted_jacobian[j][pk] * weighted_jacobian[j][column];
            }
            gamma *= betak;
            for j in k..n_r {
                let step = gamma * weighted_jacobian[j][pk];
                weighted_jacobian[j][column] -= step;
            }
        }
    }

    InternalData {
        weighted_jacobian,
        permutation,
        rank: solved_cols,
        diag_r,
        jac_norm,
        beta,
    }
}

/// 将 Qt 作用于向量 y
fn q_t_y(y: &mut [f64], internal: &InternalData) {
    let weighted_jacobian = &internal.weighted_jacobian;
    let n_r = weighted_jacobian.len();
    let n_c = weighted_jacobian[0].len();

    for k in 0..n_c {
        let pk = internal.permutation[k];
        let mut gamma = 0.0;
        for i in k..n_r {
            gamma += weighted_jacobian[i][pk] * y[i];
        }
        gamma *= internal.beta[pk];
        for i in k..n_r {
            y[i] -= gamma * weighted_jacobian[i][pk];
        }
    }
}

/// 确定使约束步落入信赖域的阻尼参数
#[allow(clippy::too_many_arguments)]
fn determine_lm_parameter(
    qy: &[f64],
    delta: f64,
    diag: &[f64],
    internal: &InternalData,
    solved_cols: usize,
    work1: &mut [f64],
    work2: &mut [f64],
    work3: &mut [f64],
    lm_dir: &mut [f64],
    mut lm_par: f64,
) -> f64 {
    let weighted_jacobian = &internal.weighted_jacobian;
    let permutation = &internal.permutation;
    let rank = internal.rank;
    let diag_r = &internal.diag_r;
    let n_c = weighted_jacobian[0].len();

    // 计算高斯-牛顿方向；雅可比秩亏时取最小二乘解
    for j in 0..rank {
        lm_dir[permutation[j]] = qy[j];
    }
    for j in rank..n_c {
        lm_dir[permutation[j]] = 0.0;
    }
    for k in (0..rank).rev() {
        let pk = permutation[k];
        let ypk = lm_dir[pk] / diag_r[pk];
        for i in 0..k {
            lm_dir[permutation[i]] -= ypk * weighted_jacobian[i][pk];
        }
        lm_dir[pk] = ypk;
    }

    // 在原点求值，测试是否可直接接受高斯-牛顿方向
    let mut dx_norm = 0.0;
    for j in 0..solved_cols {
        let pj = permutation[j];
        let s = diag[pj] * lm_dir[pj];
        work1[pj] = s;
        dx_norm += s * s;
    }
    dx_norm = dx_norm.sqrt();
    let mut fp = dx_norm - delta;
    if fp <= 0.1 * delta {
        return 0.0;
    }

    // 雅可比满秩时牛顿步给出零点下界 parl，否则下界取零
    let mut parl = 0.0;
    if rank == solved_cols {
        for j in 0..solved_cols {
            let pj = permutation[j];
            work1[pj] *= diag[pj] / dx_norm;
        }
        let mut sum2 = 0.0;
        for j in 0..solved_cols {
            let pj = permutation[j];
            let mut sum = 0.0;
            for i in 0..j {
                sum += weighted_jacobian[i][pj] * work1[permutation[i]];
            }
            let s = (work1[pj] - sum) / diag_r[pj];
            work1[pj] = s;
            sum2 += s * s;
        }
        parl = fp / (delta * sum2);
    }

    // 计算零点上界 paru
    let mut sum2 = 0.0;
    for j in 0..solved_cols {
        let pj = permutation[j];
        let mut sum = 0.0;
        for i in 0..=j {
            sum += weighted_jacobian[i][pj] * qy[i];
        }
        sum /= diag[pj];
        sum2 += sum * sum;
    }
    let g_norm = sum2.sqrt();
    let mut paru = g_norm / delta;
    if paru == 0.0 {
        paru = SAFE_MIN / delta.min(0.1);
    }

    // 若输入的 par 落在 (parl, paru) 之外则取最近端点
    lm_par = paru.min(lm_par.max(parl));
    if lm_par == 0.0 {
        lm_par = g_norm / dx_norm;
    }

    for _ in 0..11 {
        // 在当前 lmPar 处求值
        if lm_par == 0.0 {
            lm_par = SAFE_MIN.max(0.001 * paru);
        }
        let s_par = lm_par.sqrt();
        for j in 0..solved_cols {
            let pj = permutation[j];
            work1[pj] = s_par * diag[pj];
        }
        determine_lm_direction(qy, work1, work2, internal, solved_cols, work3, lm_dir);

        dx_norm = 0.0;
        for j in 0..solved_cols {
            let pj = permutation[j];
            let s = diag[pj] * lm_dir[pj];
            work3[pj] = s;
            dx_norm += s * s;
        }
        dx_norm = dx_norm.sqrt();
        let previous_fp = fp;
        fp = dx_norm - delta;

        // 函数值足够小则接受当前 lmPar；parl 为零的特例单独放行
        if fp.abs() <= 0.1 * delta || (parl == 0.0 && fp <= previous_fp && previous_fp < 0.0) {
            return lm_par;
        }

        // 牛顿校正
        for j in 0..solved_cols {
            let pj = permutation[j];
            work1[pj] = work3[pj] * diag[pj] / dx_norm;
        }
        for j in 0..solved_cols {
            let pj = permutation[j];
            work1[pj] /= work2[j];
            let tmp = work1[pj];
            for i in j + 1..solved_cols {
                work1[permutation[i]] -= weighted_jacobian[i][pj] * tmp;
            }
        }
        let mut sum2 = 0.0;
        for j in 0..solved_cols {
            let s = work1[permutation[j]];
            sum2 += s * s;
        }
        let correction = fp / (delta * sum2);

        // 依函数符号更新 parl 或 paru
        if fp > 0.0 {
            parl = parl.max(lm_par);
        } else if fp < 0.0 {
            paru = paru.min(lm_par);
        }

        lm_par = parl.max(lm_par + correction);
    }

    lm_par
}

/// 通过 Givens 旋转消去对角阻尼阵并解出步长方向
fn determine_lm_direction(
    qy: &[f64],
    diag: &[f64],
    lm_diag: &mut [f64],
    internal: &InternalData,
    solved_cols: usize,
    work: &mut [f64],
    lm_dir: &mut [f64],
) {
    let permutation = &internal.permutation;
    let mut weighted_jacobian = internal.weighted_jacobian.clone();
    let diag_r = &internal.diag_r;

    // 复制 R 与 Qty 以保留输入；R 的对角元暂存于 lmDir
    for j in 0..solved_cols {
        let pj = permutation[j];
        for i in j + 1..solved_cols {
            let mirrored = weighted_jacobian[j][permutation[i]];
            weighted_jacobian[i][pj] = mirrored;
        }
        lm_dir[j] = diag_r[pj];
        work[j] = qy[j];
    }

    // 用 Givens 旋转消去对角阵 d
    for j in 0..solved_cols {
        // 准备待消去的 d 行，借助 QR 的置换定位对角元
        let pj = permutation[j];
        let dpj = diag[pj];
        if dpj != 0.0 {
            for item in lm_diag.iter_mut().skip(j + 1) {
                *item = 0.0;
            }
        }
        lm_diag[j] = dpj;

        // 消去 d 的一行只会影响 Qty 中前 n 个之外的单个元素，该元素初始为零
        let mut qtbpj = 0.0;
        for k in j..solved_cols {
            let pk = permutation[k];

            // 确定消去当前 d 行中相应元素的 Givens 旋转
            if lm_diag[k] != 0.0 {
                let rkk = weighted_jacobian[k][pk];
                let (sin, cos) = if rkk.abs() < lm_diag[k].abs() {
                    let cotan = rkk / lm_diag[k];
                    let sin = 1.0 / (1.0 + cotan * cotan).sqrt();
                    (sin, sin * cotan)
                } else {
                    let tan = lm_diag[k] / rkk;
                    let cos = 1.0 / (1.0 + tan * tan).sqrt();
                    (cos * tan, cos)
                };

                // 计算修改后的 R 对角元与 (Qty,0) 元素
                weighted_jacobian[k][pk] = cos * rkk + sin * lm_diag[k];
                let temp = cos * work[k] + sin * qtbpj;
                qtbpj = -sin * work[k] + cos * qtbpj;
                work[k] = temp;

                // 在 s 的行中累积变换
                for i in k + 1..solved_cols {
                    let rik = weighted_jacobian[i][pk];
                    let temp2 = cos * rik + sin * lm_diag[i];
                    lm_diag[i] = -sin * rik + cos * lm_diag[i];
                    weighted_jacobian[i][pk] = temp2;
                }
            }
        }

        // 保存 s 的对角元并恢复 R 的对应对角元
        lm_diag[j] = weighted_jacobian[j][permutation[j]];
        weighted_jacobian[j][permutation[j]] = lm_dir[j];
    }

    // 解三角系统；系统奇异时取最小二乘解
    let mut n_sing = solved_cols;
    for j in 0..solved_cols {
        if lm_diag[j] == 0.0 && n_sing == solved_cols {
            n_sing = j;
        }
        if n_sing < solved_cols {
            work[j] = 0.0;
        }
    }
    if n_sing > 0 {
        for j in (0..n_sing).rev() {
            let pj = permutation[j];
            let mut sum = 0.0;
            for i in j + 1..n_sing {
                sum += weighted_jacobian[i][pj] * work[i];
            }
            work[j] = (work[j] - sum) / lm_diag[j];
        }
    }

    // 将 z 的分量按置换还原到 lmDir
    for j in 0..lm_dir.len() {
        lm_dir[permutation[j]] = work[j];
    }
}
