use potts_core::errors::ErrorInfo;
use potts_core::PottsError;

/// Splits `total` walkers across `workers` workers.
///
/// Every share is a multiple of `workgroup_size` and the shares sum to
/// `total`; this holds only when `total` is a multiple of
/// `workgroup_size * workers`, anything else is a configuration error.
pub fn divide_walkers(
    total: usize,
    workers: usize,
    workgroup_size: usize,
) -> Result<Vec<usize>, PottsError> {
    let info = |message: &str| {
        ErrorInfo::new("walker-partition", message)
            .with_context("walkers", total)
            .with_context("workers", workers)
            .with_context("workgroup_size", workgroup_size)
    };
    if workers == 0 || workgroup_size == 0 || total == 0 {
        return Err(PottsError::Config(info(
            "walkers, workers and workgroup size must be non-zero",
        )));
    }
    let block = workgroup_size * workers;
    if total % block != 0 {
        let lower = total / block * block;
        let upper = lower + block;
        let hint = if lower == 0 {
            format!("use {upper} walkers")
        } else {
            format!("use {lower} or {upper} walkers")
        };
        return Err(PottsError::Config(
            info("walker count must be a multiple of workgroup_size * workers").with_hint(hint),
        ));
    }
    Ok(vec![total / workers; workers])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn even_split_across_workers() {
        assert_eq!(divide_walkers(1024, 4, 256).unwrap(), vec![256; 4]);
        assert_eq!(divide_walkers(8, 1, 8).unwrap(), vec![8]);
    }

    #[test]
    fn remainder_is_rejected_with_hint() {
        let err = divide_walkers(768, 2, 256).unwrap_err();
        assert_eq!(err.info().code, "walker-partition");
        assert_eq!(err.info().hint.as_deref(), Some("use 512 or 1024 walkers"));
        assert!(divide_walkers(100, 0, 4).is_err());
    }

    proptest! {
        #[test]
        fn exact_multiples_partition_exactly(
            workers in 1usize..8,
            wgsize in 1usize..64,
            groups in 1usize..8,
        ) {
            let total = workers * wgsize * groups;
            let shares = divide_walkers(total, workers, wgsize).unwrap();
            prop_assert_eq!(shares.len(), workers);
            prop_assert_eq!(shares.iter().sum::<usize>(), total);
            prop_assert!(shares.iter().all(|s| s % wgsize == 0));
        }

        #[test]
        fn non_multiples_fail(
            workers in 1usize..8,
            wgsize in 2usize..64,
            groups in 0usize..8,
            extra in 1usize..64,
        ) {
            let block = workers * wgsize;
            let total = block * groups + extra % block;
            prop_assume!(total % block != 0);
            prop_assert!(divide_walkers(total, workers, wgsize).is_err());
        }
    }
}
