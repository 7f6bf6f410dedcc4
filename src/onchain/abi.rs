//! Oracle contract bindings.
//!
//! Minimal Reality.eth v3 surface: the finality read used as a freshness
//! check, and the payable answer submission used to challenge.

use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IRealityETH {
        /// True once the question's answer can no longer be changed.
        function isFinalized(bytes32 question_id) external view returns (bool);

        /// Bond currently backing the best answer. Read right before a
        /// challenge, since the subgraph can lag.
        function getBond(bytes32 question_id) external view returns (uint256);

        /// Post `answer` with `msg.value` as bond. Reverts unless the bond is at
        /// least double the current one and the current bond is not above
        /// `max_previous`.
        function submitAnswer(
            bytes32 question_id,
            bytes32 answer,
            uint256 max_previous
        ) external payable;
    }
}
