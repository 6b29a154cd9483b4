//! LSQR iterative solver for sparse least squares (Paige & Saunders 1982).
//!
//! The matrix is only touched through the [`SparseOperator`] callbacks, so
//! the double-difference design matrix is never materialised. Damping
//! solves the regularised problem `min ||Ax - b||^2 + damp^2 ||x||^2`.

use nalgebra::DVector;

use super::{IterationOutcome, SolveSummary, SparseOperator};

pub fn lsqr<A: SparseOperator>(
    op: &A,
    b: &[f64],
    damp: f64,
    atol: f64,
    btol: f64,
    conlim: f64,
    itn_lim: usize,
) -> (DVector<f64>, SolveSummary) {
    let m = op.num_rows();
    let n = op.num_cols();
    debug_assert_eq!(b.len(), m);

    let mut x = DVector::zeros(n);

    let mut u = DVector::from_column_slice(b);
    let bnorm = u.norm();
    let mut beta = bnorm;
    if beta > 0.0 {
        u /= beta;
    }
    let mut v = DVector::zeros(n);
    if beta > 0.0 {
        op.accumulate_aty(u.as_slice(), v.as_mut_slice());
    }
    let mut alpha = v.norm();
    if alpha > 0.0 {
        v /= alpha;
    }

    let mut arnorm = alpha * beta;
    if arnorm == 0.0 {
        // b = 0 or A^T b = 0: the zero vector is the solution
        return (
            x,
            SolveSummary {
                outcome: IterationOutcome::Converged,
                iterations: 0,
                rnorm: bnorm,
                arnorm,
                anorm: 0.0,
                acond: 0.0,
                xnorm: 0.0,
            },
        );
    }

    let mut w = v.clone();
    let mut rhobar = alpha;
    let mut phibar = beta;
    let dampsq = damp * damp;
    let ctol = if conlim > 0.0 { 1.0 / conlim } else { 0.0 };

    let mut anorm: f64 = 0.0;
    let mut acond = 0.0;
    let mut ddnorm = 0.0;
    let mut res2 = 0.0;
    let mut xnorm = 0.0;
    let mut xxnorm = 0.0;
    let mut z = 0.0;
    let mut cs2 = -1.0;
    let mut sn2 = 0.0;
    let mut rnorm = beta;

    let mut itn = 0;
    let mut outcome = IterationOutcome::IterationLimit;

    while itn < itn_lim {
        itn += 1;

        // bidiagonalisation: u = A v - alpha u, v = A^T u - beta v
        u *= -alpha;
        op.accumulate_ax(v.as_slice(), u.as_mut_slice());
        beta = u.norm();
        if beta > 0.0 {
            u /= beta;
            anorm = (anorm * anorm + alpha * alpha + beta * beta + dampsq).sqrt();
            v *= -beta;
            op.accumulate_aty(u.as_slice(), v.as_mut_slice());
            alpha = v.norm();
            if alpha > 0.0 {
                v /= alpha;
            }
        }

        // eliminate the damping parameter
        let rhobar1 = (rhobar * rhobar + dampsq).sqrt();
        let cs1 = rhobar / rhobar1;
        let sn1 = damp / rhobar1;
        let psi = sn1 * phibar;
        phibar *= cs1;

        // plane rotation of the lower-bidiagonal system
        let rho = (rhobar1 * rhobar1 + beta * beta).sqrt();
        let cs = rhobar1 / rho;
        let sn = beta / rho;
        let theta = sn * alpha;
        rhobar = -cs * alpha;
        let phi = cs * phibar;
        phibar *= sn;
        let tau = sn * phi;

        // update x and the search direction
        let t1 = phi / rho;
        let t2 = -theta / rho;
        ddnorm += w.norm_squared() / (rho * rho);
        x.axpy(t1, &w, 1.0);
        w = &v + w * t2;

        // estimate norm(x)
        let delta = sn2 * rho;
        let gambar = -cs2 * rho;
        let rhs = phi - delta * z;
        let zbar = rhs / gambar;
        xnorm = (xxnorm + zbar * zbar).sqrt();
        let gamma = (gambar * gambar + theta * theta).sqrt();
        cs2 = gambar / gamma;
        sn2 = theta / gamma;
        z = rhs / gamma;
        xxnorm += z * z;

        acond = anorm * ddnorm.sqrt();
        let res1 = phibar * phibar;
        res2 += psi * psi;
        rnorm = (res1 + res2).sqrt();
        arnorm = alpha * tau.abs();

        let test1 = rnorm / bnorm;
        let test2 = if anorm * rnorm > 0.0 {
            arnorm / (anorm * rnorm)
        } else {
            f64::INFINITY
        };
        let test3 = 1.0 / acond.max(f64::MIN_POSITIVE);
        let t1_ratio = test1 / (1.0 + anorm * xnorm / bnorm);
        let rtol = btol + atol * anorm * xnorm / bnorm;

        if 1.0 + test3 <= 1.0 {
            outcome = IterationOutcome::ConditionLimit;
            break;
        }
        if 1.0 + test2 <= 1.0 {
            outcome = IterationOutcome::MachinePrecision;
            break;
        }
        if 1.0 + t1_ratio <= 1.0 {
            outcome = IterationOutcome::MachinePrecision;
            break;
        }
        if test3 <= ctol {
            outcome = IterationOutcome::ConditionLimit;
            break;
        }
        if test2 <= atol {
            outcome = IterationOutcome::Converged;
            break;
        }
        if test1 <= rtol {
            outcome = IterationOutcome::Converged;
            break;
        }
    }

    (
        x,
        SolveSummary {
            outcome,
            iterations: itn,
            rnorm,
            arnorm,
            anorm,
            acond,
            xnorm,
        },
    )
}
