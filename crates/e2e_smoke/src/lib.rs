//! End-to-end checks of the gateway against a mock backend live in `tests/`.
