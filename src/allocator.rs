// 💰 Allocator - priority-driven envelope funding
//
// Greedy, priority-ordered fill without backtracking: once a higher-priority
// category takes funds, lower-priority categories cannot reclaim them in the
// same run. Every allocatable category gets a plan record, even when nothing
// is left to give it.
//
// Pure and single-pass. Re-run in full whenever available funds or funding
// progress change.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::entities::{Category, CategoryType};
use crate::error::Result;
use crate::month::BudgetMonth;
use crate::store::CategoryProvider;

// ============================================================================
// INPUT / OUTPUT TYPES
// ============================================================================

/// Funding recorded for a category in one month
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FundingProgress {
    pub funded: f64,
    pub target: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub category_id: i64,
    pub target_amount: f64,
    pub funded_this_month: f64,
    pub remaining_to_fund: f64,
    pub allocated_amount: f64,
    pub priority: u8,
    pub category_type: CategoryType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub allocations: Vec<AllocationPlan>,
    pub total_allocated: f64,
    pub remaining_funds: f64,
}

impl AllocationResult {
    pub fn plan_for(&self, category_id: i64) -> Option<&AllocationPlan> {
        self.allocations.iter().find(|p| p.category_id == category_id)
    }

    /// Increase each category's balance by its allocated amount
    pub fn apply_to(&self, categories: &mut [Category]) {
        for category in categories.iter_mut() {
            if let Some(plan) = self.plan_for(category.id) {
                category.apply_allocation(plan.allocated_amount);
            }
        }
    }
}

// ============================================================================
// ALLOCATION
// ============================================================================

/// Treat NaN/inf as zero so one malformed category can't poison the run
fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// This month's target for a category, or None if it needs nothing
/// (a target-balance envelope that is already full)
fn monthly_target(category: &Category) -> Option<f64> {
    match category.category_type {
        CategoryType::MonthlyExpense => Some(finite_or_zero(
            category.monthly_target.unwrap_or(category.monthly_amount),
        )),
        CategoryType::Accumulation => {
            Some(finite_or_zero(category.annual_target_or_default() / 12.0))
        }
        CategoryType::TargetBalance => {
            let target = finite_or_zero(category.target_balance?);
            let current = finite_or_zero(category.current_balance);
            if current >= target {
                None
            } else {
                Some(target - current)
            }
        }
    }
}

/// Distribute `available_funds` across categories in priority order
pub fn compute_smart_allocation(
    categories: &[Category],
    funding_progress: &HashMap<i64, FundingProgress>,
    available_funds: f64,
    current_month: BudgetMonth,
) -> AllocationResult {
    let mut eligible: Vec<&Category> = categories.iter().filter(|c| c.is_allocatable()).collect();
    // Vec::sort_by_key is stable: equal priorities keep input order
    eligible.sort_by_key(|c| c.priority);

    let available_funds = finite_or_zero(available_funds);
    let mut remaining_funds = available_funds;
    let mut allocations = Vec::with_capacity(eligible.len());

    for category in eligible {
        let funded_this_month = funding_progress
            .get(&category.id)
            .map(|p| finite_or_zero(p.funded))
            .unwrap_or(0.0);

        let target = monthly_target(category);
        let target_amount = target.unwrap_or(0.0);
        let remaining_to_fund = (target_amount - funded_this_month).max(0.0);

        let allocated_amount = if target.is_none() || remaining_funds <= 0.0 {
            0.0
        } else {
            remaining_to_fund.min(remaining_funds)
        };
        remaining_funds -= allocated_amount;

        debug!(
            category_id = category.id,
            priority = category.priority,
            target_amount,
            allocated_amount,
            "allocation step"
        );

        allocations.push(AllocationPlan {
            category_id: category.id,
            target_amount,
            funded_this_month,
            remaining_to_fund,
            allocated_amount,
            priority: category.priority,
            category_type: category.category_type,
        });
    }

    let total_allocated = available_funds - remaining_funds;
    info!(
        month = %current_month,
        categories = allocations.len(),
        total_allocated,
        remaining_funds,
        "allocation computed"
    );

    AllocationResult {
        allocations,
        total_allocated,
        remaining_funds,
    }
}

/// Load categories + progress from a provider and allocate
pub fn allocate_from<P: CategoryProvider + ?Sized>(
    provider: &P,
    available_funds: f64,
    month: BudgetMonth,
) -> Result<AllocationResult> {
    let categories = provider.categories()?;
    let progress = provider.funding_progress(month)?;
    Ok(compute_smart_allocation(&categories, &progress, available_funds, month))
}

/// Year-to-date shortfall of an accumulation category
///
/// Not folded into `compute_smart_allocation`; callers that want catch-up
/// funding add it to the plan themselves.
pub fn compute_catch_up_amount(category: &Category, ytd_funded: f64, current_month: BudgetMonth) -> f64 {
    if category.category_type != CategoryType::Accumulation {
        return 0.0;
    }

    let monthly = finite_or_zero(category.annual_target_or_default() / 12.0);
    let ytd_target = monthly * f64::from(current_month.month_number());
    (ytd_target - finite_or_zero(ytd_funded)).max(0.0)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn month() -> BudgetMonth {
        BudgetMonth::parse("2024-04").unwrap()
    }

    fn expense(id: i64, amount: f64, priority: u8) -> Category {
        Category::new(id, &format!("Cat {}", id), CategoryType::MonthlyExpense, amount)
            .with_priority(priority)
    }

    fn target_balance(id: i64, target: f64, current: f64, priority: u8) -> Category {
        let mut c = Category::new(id, "Emergency", CategoryType::TargetBalance, 0.0).with_priority(priority);
        c.target_balance = Some(target);
        c.current_balance = current;
        c
    }

    #[test]
    fn test_two_monthly_expenses_scenario() {
        let categories = vec![expense(1, 200.0, 1), expense(2, 100.0, 2)];
        let result = compute_smart_allocation(&categories, &HashMap::new(), 250.0, month());

        assert_eq!(result.plan_for(1).unwrap().allocated_amount, 200.0);
        assert_eq!(result.plan_for(2).unwrap().allocated_amount, 50.0);
        assert_eq!(result.plan_for(2).unwrap().remaining_to_fund, 100.0);
        assert_eq!(result.remaining_funds, 0.0);
        assert_eq!(result.total_allocated, 250.0);
    }

    #[test]
    fn test_priority_strictness() {
        // input order deliberately puts the low-priority category first
        let categories = vec![expense(2, 100.0, 5), expense(1, 300.0, 1)];
        let result = compute_smart_allocation(&categories, &HashMap::new(), 250.0, month());

        assert_eq!(result.allocations[0].category_id, 1);
        assert_eq!(result.plan_for(1).unwrap().allocated_amount, 250.0);
        assert_eq!(result.plan_for(2).unwrap().allocated_amount, 0.0);
    }

    #[test]
    fn test_zero_fund_categories_still_reported() {
        let categories = vec![expense(1, 100.0, 1), expense(2, 80.0, 2), expense(3, 60.0, 3)];
        let result = compute_smart_allocation(&categories, &HashMap::new(), 100.0, month());

        assert_eq!(result.allocations.len(), 3);
        let last = result.plan_for(3).unwrap();
        assert_eq!(last.allocated_amount, 0.0);
        assert_eq!(last.remaining_to_fund, 60.0);
        assert_eq!(last.target_amount, 60.0);
    }

    #[test]
    fn test_stable_sort_on_equal_priority() {
        let categories = vec![expense(10, 50.0, 3), expense(11, 50.0, 3), expense(12, 50.0, 3)];
        let result = compute_smart_allocation(&categories, &HashMap::new(), 70.0, month());

        let order: Vec<i64> = result.allocations.iter().map(|p| p.category_id).collect();
        assert_eq!(order, vec![10, 11, 12]);
        assert_eq!(result.plan_for(10).unwrap().allocated_amount, 50.0);
        assert_eq!(result.plan_for(11).unwrap().allocated_amount, 20.0);
        assert_eq!(result.plan_for(12).unwrap().allocated_amount, 0.0);
    }

    #[test]
    fn test_funded_this_month_reduces_need() {
        let categories = vec![expense(1, 200.0, 1), expense(2, 100.0, 2)];
        let mut progress = HashMap::new();
        progress.insert(1, FundingProgress { funded: 150.0, target: 200.0 });
        progress.insert(2, FundingProgress { funded: 120.0, target: 100.0 });

        let result = compute_smart_allocation(&categories, &progress, 500.0, month());

        let first = result.plan_for(1).unwrap();
        assert_eq!(first.funded_this_month, 150.0);
        assert_eq!(first.remaining_to_fund, 50.0);
        assert_eq!(first.allocated_amount, 50.0);

        // over-funded: nothing more, never negative
        let second = result.plan_for(2).unwrap();
        assert_eq!(second.remaining_to_fund, 0.0);
        assert_eq!(second.allocated_amount, 0.0);

        assert_eq!(result.remaining_funds, 450.0);
    }

    #[test]
    fn test_monthly_target_overrides_amount() {
        let mut rent = expense(1, 1000.0, 1);
        rent.monthly_target = Some(1200.0);
        let result = compute_smart_allocation(&[rent], &HashMap::new(), 5000.0, month());

        assert_eq!(result.plan_for(1).unwrap().target_amount, 1200.0);
    }

    #[test]
    fn test_accumulation_target_is_one_twelfth() {
        let mut insurance = Category::new(1, "Insurance", CategoryType::Accumulation, 0.0);
        insurance.annual_target = Some(1200.0);
        let gifts = Category::new(2, "Gifts", CategoryType::Accumulation, 50.0);

        let result = compute_smart_allocation(&[insurance, gifts], &HashMap::new(), 1000.0, month());

        assert!((result.plan_for(1).unwrap().target_amount - 100.0).abs() < EPS);
        // fallback: 50 * 12 / 12
        assert!((result.plan_for(2).unwrap().target_amount - 50.0).abs() < EPS);
    }

    #[test]
    fn test_target_balance_fills_gap() {
        let categories = vec![target_balance(1, 1000.0, 400.0, 1)];
        let result = compute_smart_allocation(&categories, &HashMap::new(), 10_000.0, month());

        let plan = result.plan_for(1).unwrap();
        assert_eq!(plan.target_amount, 600.0);
        assert_eq!(plan.allocated_amount, 600.0);
    }

    #[test]
    fn test_full_target_balance_gets_nothing() {
        for available in [0.0, 10.0, 1_000_000.0] {
            let categories = vec![
                target_balance(1, 1000.0, 1000.0, 1),
                target_balance(2, 500.0, 750.0, 1),
            ];
            let result = compute_smart_allocation(&categories, &HashMap::new(), available, month());

            assert_eq!(result.plan_for(1).unwrap().allocated_amount, 0.0);
            assert_eq!(result.plan_for(2).unwrap().allocated_amount, 0.0);
            assert_eq!(result.remaining_funds, available);
        }
    }

    #[test]
    fn test_excluded_categories_are_filtered() {
        let mut system = expense(1, 100.0, 1);
        system.is_system = true;
        let mut goal = expense(2, 100.0, 1);
        goal.is_goal = true;
        let mut buffer = expense(3, 100.0, 1);
        buffer.is_buffer = true;
        let normal = expense(4, 100.0, 1);

        let result = compute_smart_allocation(&[system, goal, buffer, normal], &HashMap::new(), 1000.0, month());

        assert_eq!(result.allocations.len(), 1);
        assert_eq!(result.allocations[0].category_id, 4);
    }

    #[test]
    fn test_conservation_holds() {
        let categories = vec![
            expense(1, 123.45, 2),
            expense(2, 67.89, 1),
            target_balance(3, 500.0, 120.5, 3),
            Category::new(4, "Car", CategoryType::Accumulation, 83.33),
        ];

        for available in [0.0, 33.3, 190.0, 250.01, 1e6, -50.0] {
            let result = compute_smart_allocation(&categories, &HashMap::new(), available, month());
            assert!(
                (result.total_allocated + result.remaining_funds - available).abs() < 1e-6,
                "conservation broken for {}",
                available
            );
            assert!(result.allocations.iter().all(|p| p.allocated_amount >= 0.0));
        }
    }

    #[test]
    fn test_negative_and_malformed_inputs_degrade() {
        let mut broken = expense(1, f64::NAN, 1);
        broken.monthly_target = Some(f64::INFINITY);
        let fine = expense(2, 100.0, 2);

        let negative = compute_smart_allocation(&[fine.clone()], &HashMap::new(), -20.0, month());
        assert_eq!(negative.total_allocated, 0.0);
        assert_eq!(negative.remaining_funds, -20.0);

        let result = compute_smart_allocation(&[broken, fine], &HashMap::new(), 150.0, month());
        assert_eq!(result.plan_for(1).unwrap().allocated_amount, 0.0);
        assert_eq!(result.plan_for(2).unwrap().allocated_amount, 100.0);
        assert_eq!(result.remaining_funds, 50.0);
    }

    #[test]
    fn test_target_balance_without_target_is_skipped() {
        let mut c = Category::new(1, "Savings", CategoryType::TargetBalance, 100.0);
        c.target_balance = None;
        let result = compute_smart_allocation(&[c], &HashMap::new(), 500.0, month());

        assert_eq!(result.plan_for(1).unwrap().allocated_amount, 0.0);
        assert_eq!(result.remaining_funds, 500.0);
    }

    #[test]
    fn test_apply_to_moves_balances() {
        let mut categories = vec![expense(1, 200.0, 1), expense(2, 100.0, 2)];
        let result = compute_smart_allocation(&categories, &HashMap::new(), 250.0, month());

        result.apply_to(&mut categories);
        assert_eq!(categories[0].current_balance, 200.0);
        assert_eq!(categories[1].current_balance, 50.0);
    }

    #[test]
    fn test_catch_up_amount() {
        let mut insurance = Category::new(1, "Insurance", CategoryType::Accumulation, 0.0);
        insurance.annual_target = Some(1200.0);

        // April: 4 * 100 expected, 250 funded
        assert!((compute_catch_up_amount(&insurance, 250.0, month()) - 150.0).abs() < EPS);
        // ahead of schedule
        assert_eq!(compute_catch_up_amount(&insurance, 900.0, month()), 0.0);

        let december = BudgetMonth::parse("2024-12").unwrap();
        assert!((compute_catch_up_amount(&insurance, 0.0, december) - 1200.0).abs() < EPS);
    }

    #[test]
    fn test_catch_up_only_for_accumulation() {
        let rent = expense(1, 1000.0, 1);
        assert_eq!(compute_catch_up_amount(&rent, 0.0, month()), 0.0);
    }

    #[test]
    fn test_catch_up_not_folded_into_allocation() {
        let gifts = Category::new(1, "Gifts", CategoryType::Accumulation, 50.0);
        let result = compute_smart_allocation(&[gifts], &HashMap::new(), 1000.0, month());

        // still one month's worth even though April implies 200 year-to-date
        assert!((result.plan_for(1).unwrap().allocated_amount - 50.0).abs() < EPS);
    }
}
