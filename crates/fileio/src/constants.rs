// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// Expectation message used when acquiring locks that are never poisoned
/// by design (no code path panics while holding them).
pub(crate) const ERR_POISONED_LOCK: &str = "poisoned lock - this is never expected to happen";
