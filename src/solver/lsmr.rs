//! LSMR iterative solver for sparse least squares (Fong & Saunders 2011).
//!
//! Like LSQR it only sees the matrix through the operator callbacks, but
//! it monotonically reduces `||A^T r||`, which makes it better behaved on
//! the ill-conditioned systems produced by poorly constrained clusters.
//! This is the default kernel of the double-difference solver.

use nalgebra::DVector;

use super::{IterationOutcome, SolveSummary, SparseOperator};

#[allow(clippy::too_many_arguments)]
pub fn lsmr<A: SparseOperator>(
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
    let normb = u.norm();
    let mut beta = normb;
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

    let mut normar = alpha * beta;
    if normar == 0.0 {
        return (
            x,
            SolveSummary {
                outcome: IterationOutcome::Converged,
                iterations: 0,
                rnorm: normb,
                arnorm: normar,
                anorm: 0.0,
                acond: 0.0,
                xnorm: 0.0,
            },
        );
    }

    let ctol = if conlim > 0.0 { 1.0 / conlim } else { 0.0 };

    // variables of the rotated bidiagonal recurrences
    let mut zetabar = alpha * beta;
    let mut alphabar = alpha;
    let mut rho = 1.0;
    let mut rhobar = 1.0;
    let mut cbar = 1.0;
    let mut sbar = 0.0;

    let mut h = v.clone();
    let mut hbar = DVector::zeros(n);

    // residual-norm estimation state
    let mut betadd = beta;
    let mut betad = 0.0;
    let mut rhodold = 1.0;
    let mut tautildeold = 0.0;
    let mut thetatilde = 0.0;
    let mut zeta = 0.0;
    let mut d = 0.0;

    // norm and condition estimates
    let mut norma2 = alpha * alpha;
    let mut maxrbar: f64 = 0.0;
    let mut minrbar: f64 = 1e100;

    let mut normr = beta;
    let mut norma = norma2.sqrt();
    let mut conda = 1.0;
    let mut normx = 0.0;

    let mut itn = 0;
    let mut outcome = IterationOutcome::IterationLimit;

    while itn < itn_lim {
        itn += 1;

        // next step of the Golub-Kahan bidiagonalisation
        u *= -alpha;
        op.accumulate_ax(v.as_slice(), u.as_mut_slice());
        beta = u.norm();
        if beta > 0.0 {
            u /= beta;
            v *= -beta;
            op.accumulate_aty(u.as_slice(), v.as_mut_slice());
            alpha = v.norm();
            if alpha > 0.0 {
                v /= alpha;
            }
        }

        // rotation eliminating the damping parameter
        let alphahat = (alphabar * alphabar + damp * damp).sqrt();
        let chat = alphabar / alphahat;
        let shat = damp / alphahat;

        // rotation turning the bidiagonal to upper form
        let rhoold = rho;
        rho = (alphahat * alphahat + beta * beta).sqrt();
        let c = alphahat / rho;
        let s = beta / rho;
        let thetanew = s * alpha;
        alphabar = c * alpha;

        // second rotation
        let rhobarold = rhobar;
        let zetaold = zeta;
        let thetabar = sbar * rho;
        let rhotemp = cbar * rho;
        rhobar = ((cbar * rho) * (cbar * rho) + thetanew * thetanew).sqrt();
        cbar = cbar * rho / rhobar;
        sbar = thetanew / rhobar;
        zeta = cbar * zetabar;
        zetabar *= -sbar;

        // update h, hbar, x
        hbar *= -thetabar * rho / (rhoold * rhobarold);
        hbar += &h;
        x.axpy(zeta / (rho * rhobar), &hbar, 1.0);
        h *= -thetanew / rho;
        h += &v;

        // estimate ||r||
        let betaacute = chat * betadd;
        let betacheck = -shat * betadd;
        let betahat = c * betaacute;
        betadd = -s * betaacute;

        let thetatildeold = thetatilde;
        let rhotildeold = (rhodold * rhodold + thetabar * thetabar).sqrt();
        let ctildeold = rhodold / rhotildeold;
        let stildeold = thetabar / rhotildeold;
        thetatilde = stildeold * rhobar;
        rhodold = ctildeold * rhobar;
        betad = -stildeold * betad + ctildeold * betahat;

        tautildeold = (zetaold - thetatildeold * tautildeold) / rhotildeold;
        let taud = (zeta - thetatilde * tautildeold) / rhodold;
        d += betacheck * betacheck;
        normr = (d + (betad - taud) * (betad - taud) + betadd * betadd).sqrt();

        // estimate ||A|| and cond(A)
        norma2 += beta * beta;
        norma = norma2.sqrt();
        norma2 += alpha * alpha;
        maxrbar = maxrbar.max(rhobarold);
        if itn > 1 {
            minrbar = minrbar.min(rhobarold);
        }
        conda = maxrbar.max(rhotemp) / minrbar.min(rhotemp);

        normar = zetabar.abs();
        normx = x.norm();

        // convergence tests, in the order of the reference implementation
        let test1 = normr / normb;
        let test2 = if norma * normr > 0.0 {
            normar / (norma * normr)
        } else {
            f64::INFINITY
        };
        let test3 = 1.0 / conda;
        let t1 = test1 / (1.0 + norma * normx / normb);
        let rtol = btol + atol * norma * normx / normb;

        if 1.0 + test3 <= 1.0 {
            outcome = IterationOutcome::ConditionLimit;
            break;
        }
        if 1.0 + test2 <= 1.0 {
            outcome = IterationOutcome::MachinePrecision;
            break;
        }
        if 1.0 + t1 <= 1.0 {
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
            rnorm: normr,
            arnorm: normar,
            anorm: norma,
            acond: conda,
            xnorm: normx,
        },
    )
}

#[cfg(test)]
mod lsmr_test {
    use super::super::DenseOperator;
    use super::*;

    #[test]
    fn solves_square_system() {
        let op = DenseOperator::new(2, 2, vec![2.0, 1.0, 1.0, 3.0]);
        let (x, summary) = lsmr(&op, &[3.0, 5.0], 0.0, 1e-10, 1e-10, 1e8, 50);
        assert!(matches!(summary.outcome, IterationOutcome::Converged));
        assert!((x[0] - 0.8).abs() < 1e-8);
        assert!((x[1] - 1.4).abs() < 1e-8);
    }

    #[test]
    fn agrees_with_lsqr_on_least_squares() {
        let entries = vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, -1.0];
        let op = DenseOperator::new(4, 2, entries);
        let b = [1.0, 1.0, 0.5, -0.25];
        let (x_lsmr, _) = lsmr(&op, &b, 0.0, 1e-12, 1e-12, 1e8, 200);
        let (x_lsqr, _) = super::super::lsqr::lsqr(&op, &b, 0.0, 1e-12, 1e-12, 1e8, 200);
        assert!((x_lsmr[0] - x_lsqr[0]).abs() < 1e-8);
        assert!((x_lsmr[1] - x_lsqr[1]).abs() < 1e-8);
    }

    #[test]
    fn rank_deficient_gives_minimum_norm_solution() {
        // both columns identical: x0 + x1 = 1 has minimum norm at 0.5, 0.5
        let op = DenseOperator::new(2, 2, vec![1.0, 1.0, 1.0, 1.0]);
        let (x, _) = lsmr(&op, &[1.0, 1.0], 0.0, 1e-12, 1e-12, 1e8, 100);
        assert!((x[0] - 0.5).abs() < 1e-8);
        assert!((x[1] - 0.5).abs() < 1e-8);
    }

    #[test]
    fn fixed_iteration_budget_is_honoured() {
        let op = DenseOperator::new(2, 2, vec![2.0, 1.0, 1.0, 3.0]);
        let (_, summary) = lsmr(&op, &[3.0, 5.0], 0.0, 0.0, 0.0, 0.0, 2);
        assert!(summary.iterations <= 2);
    }
}
