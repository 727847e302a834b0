// SPDX-License-Identifier: Apache-2.0 OR MIT
// Intentionally empty: this package only carries integration tests.
