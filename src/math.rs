//! 模块封装了门限秘密恢复 (Threshold Secret Reconstruction) 中核心的数学原语，
//! 主要涉及有限域运算、多项式求值以及拉格朗日插值 (Lagrange Interpolation)。
//!
//! ## 主要功能 (Key Features)
//!
//! 1. **有限域运算 (`add` / `sub` / `mul` / `inverse`)**:
//!    - 所有计算都在 secp256k1 的标量域上进行，模数为素数 n (约 2^256)。
//!    - 求逆失败 (对 0 求逆) 返回 `SharingError::NonInvertible`，不会 panic。
//!
//! 2. **多项式 (`random_polynomial` / `evaluate_polynomial`)**:
//!    - 常数项为秘密，其余 t-1 个系数从有限域中均匀随机选取。
//!
//! 3. **拉格朗日插值 (`lagrange_coefficient` / `interpolate_at`)**:
//!    - 从 t 个点恢复多项式在任意 x 处的值，x = 0 时即为秘密本身。
//!
//! ## 安全性 (Security)
//!
//! - 使用 `k256::Scalar`，运算是精确的模运算，不存在浮点误差。
//! - 随机系数由调用方提供的 CSPRNG 生成 (默认 `OsRng`)。
//! - 本模块仅包含纯数学逻辑，不涉及网络通信或分片存储。

use elliptic_curve::Field;
use k256::Scalar;
use rand_core::{CryptoRng, RngCore};

use crate::error::{SharingError, SharingResult};

pub fn add(a: &Scalar, b: &Scalar) -> Scalar {
    *a + *b
}

pub fn sub(a: &Scalar, b: &Scalar) -> Scalar {
    *a - *b
}

pub fn mul(a: &Scalar, b: &Scalar) -> Scalar {
    *a * *b
}

/// 模逆 (Modular Inverse)，0 没有逆元。
pub fn inverse(a: &Scalar) -> SharingResult<Scalar> {
    Option::<Scalar>::from(a.invert()).ok_or(SharingError::NonInvertible)
}

/// 参与方索引 -> 域元素 (x 坐标)
pub fn x_coordinate(index: u16) -> Scalar {
    Scalar::from(u64::from(index))
}

/// 计算拉格朗日基函数 $\lambda_i$ 在 `at` 处的值
///
/// ### 原理 (Theory)
/// 对一组互不相同的 x 坐标 $S$，多项式在 `at` 处的值为
/// $$ f(at) = \sum_{i \in S} y_i \cdot \lambda_{i, S}(at) $$
/// 其中
/// $$ \lambda_{i, S}(at) = \prod_{j \in S, j \neq i} \frac{at - x_j}{x_i - x_j} $$
/// 当 `at = 0` 时化简为 $\prod_{j \neq i} \frac{x_j}{x_j - x_i}$，即恢复秘密所用的系数。
///
/// ### 参数 (Parameters)
/// - `x_i`: 当前点的 x 坐标 (1-based 的分片索引)。
/// - `all_x`: 参与插值的全部 x 坐标 (包含 `x_i` 本身)。
/// - `at`: 求值点。
pub fn lagrange_coefficient(x_i: u16, all_x: &[u16], at: &Scalar) -> SharingResult<Scalar> {
    let my_x = x_coordinate(x_i);
    let mut num = Scalar::ONE;
    let mut den = Scalar::ONE;

    for &other in all_x {
        if other == x_i {
            continue;
        }
        let other_x = x_coordinate(other);
        num = mul(&num, &sub(at, &other_x));
        den = mul(&den, &sub(&my_x, &other_x));
    }

    // In finite fields, division is multiplication by the modular inverse.
    Ok(mul(&num, &inverse(&den)?))
}

/// 插值求值：给定互不相同的点 $(x_i, y_i)$，返回唯一的 (|S|-1) 次多项式在 `at` 处的值。
pub fn interpolate_at(points: &[(u16, Scalar)], at: &Scalar) -> SharingResult<Scalar> {
    let all_x: Vec<u16> = points.iter().map(|(x, _)| *x).collect();
    let mut acc = Scalar::ZERO;
    for (x_i, y_i) in points {
        let lambda = lagrange_coefficient(*x_i, &all_x, at)?;
        acc = add(&acc, &mul(y_i, &lambda));
    }
    Ok(acc)
}

/// 构造 degree 次随机多项式，系数按升幂排列，`coeffs[0] = constant`。
pub fn random_polynomial<R: CryptoRng + RngCore>(
    constant: Scalar,
    degree: usize,
    rng: &mut R,
) -> Vec<Scalar> {
    let mut coeffs = Vec::with_capacity(degree + 1);
    coeffs.push(constant);
    for _ in 0..degree {
        coeffs.push(Scalar::random(&mut *rng));
    }
    coeffs
}

/// Horner's method: f(x) = c_0 + x (c_1 + x (c_2 + ...))
pub fn evaluate_polynomial(coeffs: &[Scalar], x: &Scalar) -> Scalar {
    coeffs
        .iter()
        .rev()
        .fold(Scalar::ZERO, |acc, c| add(&mul(&acc, x), c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn inverse_of_zero_is_rejected() {
        assert_eq!(inverse(&Scalar::ZERO), Err(SharingError::NonInvertible));
    }

    #[test]
    fn inverse_round_trips() {
        let a = Scalar::from(123_456_789u64);
        let inv = inverse(&a).unwrap();
        assert_eq!(mul(&a, &inv), Scalar::ONE);
    }

    #[test]
    fn sub_wraps_around_the_modulus() {
        let one = Scalar::ONE;
        let two = Scalar::from(2u64);
        let minus_one = sub(&one, &two);
        assert_eq!(add(&minus_one, &two), one);
        assert_eq!(minus_one, -Scalar::ONE);
    }

    #[test]
    fn horner_matches_naive_evaluation() {
        // f(x) = 7 + 3x + 2x^2
        let coeffs = [Scalar::from(7u64), Scalar::from(3u64), Scalar::from(2u64)];
        let y = evaluate_polynomial(&coeffs, &Scalar::from(5u64));
        assert_eq!(y, Scalar::from(7u64 + 15 + 50));
    }

    #[test]
    fn interpolation_recovers_constant_term() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let secret = Scalar::from(42u64);
        let coeffs = random_polynomial(secret, 3, &mut rng);
        let points: Vec<(u16, Scalar)> = [2u16, 5, 9, 11]
            .iter()
            .map(|&x| (x, evaluate_polynomial(&coeffs, &x_coordinate(x))))
            .collect();

        assert_eq!(interpolate_at(&points, &Scalar::ZERO).unwrap(), secret);
        // Any other x lands back on the polynomial as well.
        let at = x_coordinate(4);
        assert_eq!(
            interpolate_at(&points, &at).unwrap(),
            evaluate_polynomial(&coeffs, &at)
        );
    }

    #[test]
    fn lagrange_coefficients_at_zero_sum_to_one() {
        // Interpolating the constant polynomial 1 yields sum(lambda_i) == 1.
        let xs = [1u16, 3, 4];
        let sum = xs.iter().fold(Scalar::ZERO, |acc, &x| {
            add(&acc, &lagrange_coefficient(x, &xs, &Scalar::ZERO).unwrap())
        });
        assert_eq!(sum, Scalar::ONE);
    }
}
