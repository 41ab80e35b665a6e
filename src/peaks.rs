//! Local maximum search shared by the correlation engine and the delay
//! estimators.

/// Indices of the local maxima of `x`, in ascending order.
///
/// A sample is a maximum if it is strictly larger than its neighbours; the
/// first and last samples never are. A flat-topped maximum is reported once,
/// at the middle of the plateau (rounding down).
pub fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut maxima = Vec::new();
    if x.len() < 3 {
        return maxima;
    }

    let i_max = x.len() - 1;
    let mut i = 1;
    while i < i_max {
        if x[i - 1] < x[i] {
            let mut i_ahead = i + 1;
            while i_ahead < i_max && x[i_ahead] == x[i] {
                i_ahead += 1;
            }
            if x[i_ahead] < x[i] {
                maxima.push((i + i_ahead - 1) / 2);
            }
            i = i_ahead;
        } else {
            i += 1;
        }
    }
    maxima
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_interior_maxima() {
        let x = [0.0, 1.0, 0.0, 2.0, 3.0, 1.0, 5.0];
        assert_eq!(local_maxima(&x), vec![1, 4]);
    }

    #[test]
    fn plateau_reports_middle() {
        let x = [0.0, 1.0, 1.0, 1.0, 0.0];
        assert_eq!(local_maxima(&x), vec![2]);

        let x = [0.0, 1.0, 1.0, 0.0];
        assert_eq!(local_maxima(&x), vec![1]);
    }

    #[test]
    fn edges_and_shoulders_are_not_maxima() {
        assert!(local_maxima(&[3.0, 2.0, 1.0]).is_empty());
        assert!(local_maxima(&[0.0, 1.0, 1.0]).is_empty());
        assert!(local_maxima(&[1.0]).is_empty());
        assert!(local_maxima(&[]).is_empty());
    }
}
