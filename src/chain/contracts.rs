//! ABI surface of the contracts chainpilot drives, and where they live.

use alloy_primitives::Address;
use alloy_sol_types::sol;
use serde::{Deserialize, Serialize};

sol! {
    /// ERC-721 collection with an owner-gated mint.
    interface INftCollection {
        function owner() external view returns (address);
        function ownerOf(uint256 tokenId) external view returns (address);
        function getApproved(uint256 tokenId) external view returns (address);
        function isApprovedForAll(address owner, address operator) external view returns (bool);
        function approve(address to, uint256 tokenId) external;
        function mint(address to, string tokenURI) external returns (uint256);
    }

    interface IMarketplace {
        function listItem(uint256 tokenId, uint256 price) external;
        function buyItem(uint256 tokenId) external payable;
        function getListing(uint256 tokenId)
            external
            view
            returns (address seller, uint256 price, bool active);
    }

    interface IStaking {
        function stake(uint256 tokenId) external;
        function unstake(uint256 tokenId) external;
        function getStakeInfo(uint256 tokenId)
            external
            view
            returns (address staker, uint256 startTime, uint256 rewards);
    }

    interface ILending {
        function createLoan(uint256 tokenId, uint256 amount, uint256 durationDays) external;
        function repayLoan(uint256 loanId) external payable;
        function getLoan(uint256 loanId) external view returns (
            address borrower,
            address lender,
            uint256 tokenId,
            uint256 amount,
            uint256 dueDate,
            bool repaid
        );
    }

    // Custom errors raised by current OpenZeppelin collections.
    error ERC721InsufficientApproval(address operator, uint256 tokenId);
    error ERC721IncorrectOwner(address sender, uint256 tokenId, address owner);
    error ERC721NonexistentToken(uint256 tokenId);
    error OwnableUnauthorizedAccount(address account);
}

/// Deployed addresses. Each one is optional; operations that need a missing
/// contract fail validation instead of guessing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractBook {
    pub nft: Option<Address>,
    pub marketplace: Option<Address>,
    pub staking: Option<Address>,
    pub lending: Option<Address>,
}

/// Names a contract slot for error messages and configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractRole {
    Nft,
    Marketplace,
    Staking,
    Lending,
}

impl ContractRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nft => "NFT contract",
            Self::Marketplace => "marketplace contract",
            Self::Staking => "staking contract",
            Self::Lending => "lending contract",
        }
    }

    pub fn env_key(&self) -> &'static str {
        match self {
            Self::Nft => "NFT_CONTRACT_ADDRESS",
            Self::Marketplace => "MARKETPLACE_CONTRACT_ADDRESS",
            Self::Staking => "STAKING_CONTRACT_ADDRESS",
            Self::Lending => "LENDING_CONTRACT_ADDRESS",
        }
    }
}

impl ContractBook {
    pub fn get(&self, role: ContractRole) -> Option<Address> {
        match role {
            ContractRole::Nft => self.nft,
            ContractRole::Marketplace => self.marketplace,
            ContractRole::Staking => self.staking,
            ContractRole::Lending => self.lending,
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::U256;
    use alloy_sol_types::SolCall;

    use super::*;

    #[test]
    fn selectors_match_standard_erc721() {
        assert_eq!(INftCollection::ownerOfCall::SELECTOR, [0x63, 0x52, 0x21, 0x1e]);
        assert_eq!(INftCollection::approveCall::SELECTOR, [0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(
            INftCollection::isApprovedForAllCall::SELECTOR,
            [0xe9, 0x85, 0xe9, 0xc5]
        );
    }

    #[test]
    fn encoded_call_starts_with_selector() {
        let call = IMarketplace::listItemCall {
            tokenId: U256::from(5u64),
            price: U256::from(10u64),
        };
        let data = call.abi_encode();
        assert_eq!(&data[..4], IMarketplace::listItemCall::SELECTOR.as_slice());
        assert_eq!(data.len(), 4 + 64);
    }

    #[test]
    fn missing_contract_is_none() {
        let book = ContractBook {
            nft: Some(Address::repeat_byte(1)),
            ..ContractBook::default()
        };
        assert_eq!(book.get(ContractRole::Nft), Some(Address::repeat_byte(1)));
        assert_eq!(book.get(ContractRole::Lending), None);
        assert_eq!(ContractRole::Lending.env_key(), "LENDING_CONTRACT_ADDRESS");
    }
}
