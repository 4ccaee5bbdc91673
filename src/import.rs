// 📂 CSV Import - categories and training pairs
//
// Both files have a header row. Category columns beyond id/name are optional.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::entities::Category;
use crate::error::Result;

/// One confirmed merchant → category pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRow {
    pub merchant: String,
    pub category_id: i64,
}

pub fn load_categories_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Category>> {
    let mut rdr = csv::Reader::from_path(path)?;
    read_all(&mut rdr)
}

pub fn load_training_csv<P: AsRef<Path>>(path: P) -> Result<Vec<TrainingRow>> {
    let mut rdr = csv::Reader::from_path(path)?;
    read_all(&mut rdr)
}

fn read_all<R, T>(rdr: &mut csv::Reader<R>) -> Result<Vec<T>>
where
    R: std::io::Read,
    T: for<'de> Deserialize<'de>,
{
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        rows.push(result?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::CategoryType;

    fn reader(data: &str) -> csv::Reader<&[u8]> {
        csv::Reader::from_reader(data.as_bytes())
    }

    #[test]
    fn test_categories_with_sparse_columns() {
        let data = "\
id,name,category_type,priority,monthly_amount,annual_target,target_balance
1,Rent,monthly_expense,1,1200,,
2,Insurance,accumulation,3,0,1200,
3,Emergency Fund,target_balance,8,0,,5000
";
        let categories: Vec<Category> = read_all(&mut reader(data)).unwrap();

        assert_eq!(categories.len(), 3);
        assert_eq!(categories[0].category_type, CategoryType::MonthlyExpense);
        assert_eq!(categories[0].annual_target, None);
        assert_eq!(categories[1].annual_target, Some(1200.0));
        assert_eq!(categories[2].target_balance, Some(5000.0));
        assert_eq!(categories[2].current_balance, 0.0);
        assert!(!categories[2].is_goal);
    }

    #[test]
    fn test_blank_cells_use_defaults() {
        let data = "\
id,name,category_type,priority,monthly_amount,current_balance,is_system,is_buffer,is_goal
1,Rent,monthly_expense,,1200,,,,
2,Buffer,,42,,15.5,false,true,
3,Fun,target_balance,0,50,,,,
";
        let categories: Vec<Category> = read_all(&mut reader(data)).unwrap();

        assert_eq!(categories[0].priority, 5);
        assert_eq!(categories[0].monthly_amount, 1200.0);
        assert_eq!(categories[0].current_balance, 0.0);
        assert!(!categories[0].is_buffer);

        assert_eq!(categories[1].category_type, CategoryType::MonthlyExpense);
        assert_eq!(categories[1].priority, 10);
        assert_eq!(categories[1].monthly_amount, 0.0);
        assert_eq!(categories[1].current_balance, 15.5);
        assert!(categories[1].is_buffer);

        assert_eq!(categories[2].priority, 1);
    }

    #[test]
    fn test_training_rows() {
        let data = "merchant,category_id\nKROGER #881,2\n\"Joe's Pizza, Inc.\",7\n";
        let rows: Vec<TrainingRow> = read_all(&mut reader(data)).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].merchant, "Joe's Pizza, Inc.");
        assert_eq!(rows[1].category_id, 7);
    }

    #[test]
    fn test_malformed_row_fails() {
        let data = "merchant,category_id\nKroger,groceries\n";
        let rows: Result<Vec<TrainingRow>> = read_all(&mut reader(data));
        assert!(rows.is_err());
    }
}
